//! Caching subsystem.
//!
//! Only process-local state lives here: the [`DiscoveryCache`] of
//! per-host service discovery records. Persistent caching of provider
//! documents and archives is the job of [`Storage`](crate::storage::Storage).

pub mod discovery;

pub use discovery::{DiscoveryCache, DiscoveryConfig, DiscoveryRecord, validate_providers_endpoint};
