//! Persistent cache backends.
//!
//! [`Storage`] holds three kinds of provider metadata (index documents,
//! version documents and bulk listings) plus archive bytes. A missing
//! entry is `Ok(None)`; `Err` always means the backend itself failed.
//!
//! Backends are safe for concurrent use. Concurrent writers of the same
//! key are allowed; the last one wins.

mod filesystem;
mod memory;

pub use filesystem::FilesystemStorage;
pub use memory::MemoryStorage;

use std::io;
use std::path::{Component, Path};
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::types::{ProviderCoordinate, validate_path_component};
use crate::{Result, SpeculumError};

/// Archive bytes in flight, from upstream or from a cache read.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Wrap an in-memory buffer as a single-chunk [`ByteStream`].
pub fn single_chunk(data: Bytes) -> ByteStream {
    Box::pin(futures_util::stream::iter([Ok(data)]))
}

/// Cache backend consumed by [`Mirror`](crate::Mirror).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    async fn get_index(&self, coord: &ProviderCoordinate) -> Result<Option<Bytes>>;

    async fn put_index(&self, coord: &ProviderCoordinate, data: Bytes) -> Result<()>;

    async fn get_version(&self, coord: &ProviderCoordinate, version: &str)
    -> Result<Option<Bytes>>;

    async fn put_version(&self, coord: &ProviderCoordinate, version: &str, data: Bytes)
    -> Result<()>;

    /// The raw native-API versions listing, kept apart from mirror documents.
    async fn get_bulk_listing(&self, coord: &ProviderCoordinate) -> Result<Option<Bytes>>;

    async fn put_bulk_listing(&self, coord: &ProviderCoordinate, data: Bytes) -> Result<()>;

    /// Open a cached archive. `path` is relative to the archive root.
    async fn get_archive(&self, path: &str) -> Result<Option<ByteStream>>;

    /// Persist an archive, consuming the stream. Nothing becomes visible
    /// under `path` unless the whole stream was written.
    async fn put_archive(&self, path: &str, data: ByteStream) -> Result<()>;

    async fn exists_archive(&self, path: &str) -> Result<bool>;
}

/// Check a relative archive path: non-empty, only normal components, and
/// every component a safe path segment.
pub fn validate_archive_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(SpeculumError::Storage(
            "archive path cannot be empty".to_string(),
        ));
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    SpeculumError::Storage(format!("archive path is not UTF-8: {path:?}"))
                })?;
                validate_path_component("archive path", part)
                    .map_err(|e| SpeculumError::Storage(e.to_string()))?;
            }
            _ => {
                return Err(SpeculumError::Storage(format!(
                    "archive path must be relative without `.` or `..`: {path:?}"
                )));
            }
        }
    }
    Ok(())
}

fn check_coordinate(coord: &ProviderCoordinate) -> Result<()> {
    coord
        .validate()
        .map_err(|e| SpeculumError::Storage(e.to_string()))
}

fn check_version(version: &str) -> Result<()> {
    validate_path_component("version", version).map_err(|e| SpeculumError::Storage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_nested_relative_paths() {
        assert!(validate_archive_path("registry.terraform.io/hashicorp/aws/a.zip").is_ok());
        assert!(validate_archive_path("a.zip").is_ok());
    }

    #[test]
    fn rejects_traversal_and_absolute_paths() {
        for path in ["", "../etc/passwd", "a/../../b", "/etc/passwd", "./a.zip"] {
            assert!(
                validate_archive_path(path).is_err(),
                "{path:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_backslashes_and_control_characters() {
        assert!(validate_archive_path("a\\..\\b.zip").is_err());
        assert!(validate_archive_path("a/b\n.zip").is_err());
    }
}
