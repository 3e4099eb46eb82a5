//! Public types for the Speculum API.

mod protocol;
mod provider;
mod registry;

pub use protocol::{Archive, IndexResponse, VersionMarker, VersionResponse};
pub use provider::{Platform, ProviderCoordinate, validate_path_component};
pub use registry::{BulkListing, DownloadInfo, ListedPlatform, ListedVersion};
