//! Filesystem storage backend.
//!
//! The layout under the cache root is the one `terraform providers mirror`
//! produces, so a populated cache directory can also be served statically:
//!
//! ```text
//! {root}/{hostname}/{namespace}/{type}/index.json
//! {root}/{hostname}/{namespace}/{type}/{version}.json
//! {root}/{hostname}/{namespace}/{type}/{archive filename}
//! {root}/.speculum-internal/{hostname}/{namespace}/{type}/versions.json
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::{
    ByteStream, Storage, check_coordinate, check_version, single_chunk, validate_archive_path,
};
use crate::types::ProviderCoordinate;
use crate::{Result, SpeculumError};

/// Directory for data that is not part of the mirror layout.
const INTERNAL_DIR: &str = ".speculum-internal";

/// Read size when streaming archives back out.
const CHUNK_SIZE: usize = 64 * 1024;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stores every entry as a file below a cache root.
///
/// Writes land in a temporary file next to the target and are renamed
/// into place, so readers see either the old file or the complete new one.
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    /// Open (creating if needed) a cache rooted at `root`.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            SpeculumError::Storage(format!(
                "failed to create cache directory {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn provider_dir(&self, coord: &ProviderCoordinate) -> PathBuf {
        self.root
            .join(coord.hostname())
            .join(coord.namespace())
            .join(coord.provider_type())
    }

    fn index_path(&self, coord: &ProviderCoordinate) -> PathBuf {
        self.provider_dir(coord).join("index.json")
    }

    fn version_path(&self, coord: &ProviderCoordinate, version: &str) -> PathBuf {
        self.provider_dir(coord).join(format!("{version}.json"))
    }

    fn listing_path(&self, coord: &ProviderCoordinate) -> PathBuf {
        self.root
            .join(INTERNAL_DIR)
            .join(coord.hostname())
            .join(coord.namespace())
            .join(coord.provider_type())
            .join("versions.json")
    }

    fn archive_path(&self, path: &str) -> Result<PathBuf> {
        validate_archive_path(path)?;
        Ok(self.root.join(path))
    }
}

async fn read_optional(path: &Path) -> Result<Option<Bytes>> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(Bytes::from(data))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SpeculumError::Storage(format!(
            "failed to read {}: {e}",
            path.display()
        ))),
    }
}

/// Write `data` to a fresh temporary file beside `path`, then rename it
/// into place. The temporary file is removed on any failure.
async fn write_atomic(path: &Path, data: ByteStream) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        SpeculumError::Storage(format!("no parent directory for {}", path.display()))
    })?;
    fs::create_dir_all(dir).await.map_err(|e| {
        SpeculumError::Storage(format!(
            "failed to create directory {}: {e}",
            dir.display()
        ))
    })?;

    let tmp_path = dir.join(format!(
        ".tmp-{}-{}",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    if let Err(e) = write_file(&tmp_path, data).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(SpeculumError::Storage(format!(
            "failed to write {}: {e}",
            tmp_path.display()
        )));
    }
    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(SpeculumError::Storage(format!(
            "failed to rename {} to {}: {e}",
            tmp_path.display(),
            path.display()
        )));
    }
    debug!(path = %path.display(), "cache file written");
    Ok(())
}

async fn write_file(path: &Path, mut data: ByteStream) -> io::Result<()> {
    let mut file = fs::File::create(path).await?;
    while let Some(chunk) = data.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    file.sync_all().await
}

fn file_stream(file: fs::File) -> ByteStream {
    Box::pin(futures_util::stream::unfold(Some(file), |state| async move {
        let mut file = state?;
        let mut buffer = BytesMut::with_capacity(CHUNK_SIZE);
        match file.read_buf(&mut buffer).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buffer.freeze()), Some(file))),
            Err(e) => Some((Err(e), None)),
        }
    }))
}

#[async_trait]
impl Storage for FilesystemStorage {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn get_index(&self, coord: &ProviderCoordinate) -> Result<Option<Bytes>> {
        check_coordinate(coord)?;
        read_optional(&self.index_path(coord)).await
    }

    async fn put_index(&self, coord: &ProviderCoordinate, data: Bytes) -> Result<()> {
        check_coordinate(coord)?;
        write_atomic(&self.index_path(coord), single_chunk(data)).await
    }

    async fn get_version(
        &self,
        coord: &ProviderCoordinate,
        version: &str,
    ) -> Result<Option<Bytes>> {
        check_coordinate(coord)?;
        check_version(version)?;
        read_optional(&self.version_path(coord, version)).await
    }

    async fn put_version(
        &self,
        coord: &ProviderCoordinate,
        version: &str,
        data: Bytes,
    ) -> Result<()> {
        check_coordinate(coord)?;
        check_version(version)?;
        write_atomic(&self.version_path(coord, version), single_chunk(data)).await
    }

    async fn get_bulk_listing(&self, coord: &ProviderCoordinate) -> Result<Option<Bytes>> {
        check_coordinate(coord)?;
        read_optional(&self.listing_path(coord)).await
    }

    async fn put_bulk_listing(&self, coord: &ProviderCoordinate, data: Bytes) -> Result<()> {
        check_coordinate(coord)?;
        write_atomic(&self.listing_path(coord), single_chunk(data)).await
    }

    async fn get_archive(&self, path: &str) -> Result<Option<ByteStream>> {
        let full_path = self.archive_path(path)?;
        match fs::File::open(&full_path).await {
            Ok(file) => Ok(Some(file_stream(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SpeculumError::Storage(format!(
                "failed to open archive {}: {e}",
                full_path.display()
            ))),
        }
    }

    async fn put_archive(&self, path: &str, data: ByteStream) -> Result<()> {
        let full_path = self.archive_path(path)?;
        write_atomic(&full_path, data).await
    }

    async fn exists_archive(&self, path: &str) -> Result<bool> {
        let full_path = self.archive_path(path)?;
        fs::try_exists(&full_path).await.map_err(|e| {
            SpeculumError::Storage(format!(
                "failed to stat archive {}: {e}",
                full_path.display()
            ))
        })
    }
}
