//! Speculum - caching mirror for Terraform provider registries
//!
//! Speculum implements the provider network mirror protocol in front of
//! any number of upstream registries. Requests are answered from a local
//! cache when possible; otherwise metadata is fetched upstream, converted
//! into mirror-protocol documents whose archive URLs point back at the
//! mirror, and cached. Archives are downloaded on first request only.
//!
//! The pieces:
//!
//! - [`DiscoveryCache`]: per-host service discovery with a TTL and
//!   single-flight lookups.
//! - [`UpstreamClient`]: native registry API with a mirror-protocol
//!   fallback, retries with exponential backoff.
//! - [`Mirror`]: cache-or-fetch orchestration over a [`Storage`](storage::Storage)
//!   backend.
//! - [`server`] (feature `server`): the axum front end and daemon config.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use speculum::storage::MemoryStorage;
//! use speculum::{Mirror, ProviderCoordinate, UpstreamClient, UpstreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> speculum::Result<()> {
//!     let upstream = Arc::new(UpstreamClient::new(UpstreamConfig::default())?);
//!     let mirror = Mirror::new(
//!         Arc::new(MemoryStorage::new()),
//!         upstream,
//!         "http://localhost:8080/terraform/providers",
//!     );
//!
//!     let coord = ProviderCoordinate::new("registry.terraform.io", "hashicorp", "aws")?;
//!     let index = mirror.get_index(&coord).await?;
//!     println!("{}", String::from_utf8_lossy(&index));
//!
//!     let version = mirror.get_version(&coord, "5.0.0").await?;
//!     println!("{}", String::from_utf8_lossy(&version));
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod mirror;
#[cfg(feature = "server")]
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod upstream;
pub mod version;

// Re-export main types at crate root
pub use cache::{DiscoveryCache, DiscoveryConfig, DiscoveryRecord};
pub use error::{Result, SpeculumError};
pub use mirror::Mirror;
pub use upstream::{ProviderApi, RetryConfig, UpstreamClient, UpstreamConfig, VersionFetch};
pub use version::{PKG_VERSION, version_string};

pub use types::{
    Archive, BulkListing, DownloadInfo, IndexResponse, ListedPlatform, ListedVersion, Platform,
    ProviderCoordinate, VersionResponse,
};
