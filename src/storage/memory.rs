//! In-process storage backend, for tests and throwaway mirrors.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;

use super::{
    ByteStream, Storage, check_coordinate, check_version, single_chunk, validate_archive_path,
};
use crate::Result;
use crate::types::ProviderCoordinate;

type Table = RwLock<HashMap<String, Bytes>>;

/// Keeps everything in three maps: mirror documents, bulk listings and
/// archives. Contents are lost with the process.
#[derive(Default)]
pub struct MemoryStorage {
    documents: Table,
    listings: Table,
    archives: Table,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        for table in [&self.documents, &self.listings, &self.archives] {
            table.write().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    /// Number of stored archives.
    pub fn archive_count(&self) -> usize {
        self.archives
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn read(table: &Table, key: &str) -> Option<Bytes> {
    table
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key)
        .cloned()
}

fn write(table: &Table, key: String, data: Bytes) {
    table
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key, data);
}

fn index_key(coord: &ProviderCoordinate) -> String {
    format!("{coord}/index.json")
}

fn version_key(coord: &ProviderCoordinate, version: &str) -> String {
    format!("{coord}/{version}.json")
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_index(&self, coord: &ProviderCoordinate) -> Result<Option<Bytes>> {
        check_coordinate(coord)?;
        Ok(read(&self.documents, &index_key(coord)))
    }

    async fn put_index(&self, coord: &ProviderCoordinate, data: Bytes) -> Result<()> {
        check_coordinate(coord)?;
        write(&self.documents, index_key(coord), data);
        Ok(())
    }

    async fn get_version(
        &self,
        coord: &ProviderCoordinate,
        version: &str,
    ) -> Result<Option<Bytes>> {
        check_coordinate(coord)?;
        check_version(version)?;
        Ok(read(&self.documents, &version_key(coord, version)))
    }

    async fn put_version(
        &self,
        coord: &ProviderCoordinate,
        version: &str,
        data: Bytes,
    ) -> Result<()> {
        check_coordinate(coord)?;
        check_version(version)?;
        write(&self.documents, version_key(coord, version), data);
        Ok(())
    }

    async fn get_bulk_listing(&self, coord: &ProviderCoordinate) -> Result<Option<Bytes>> {
        check_coordinate(coord)?;
        Ok(read(&self.listings, &coord.to_string()))
    }

    async fn put_bulk_listing(&self, coord: &ProviderCoordinate, data: Bytes) -> Result<()> {
        check_coordinate(coord)?;
        write(&self.listings, coord.to_string(), data);
        Ok(())
    }

    async fn get_archive(&self, path: &str) -> Result<Option<ByteStream>> {
        validate_archive_path(path)?;
        Ok(read(&self.archives, path).map(single_chunk))
    }

    async fn put_archive(&self, path: &str, mut data: ByteStream) -> Result<()> {
        validate_archive_path(path)?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = data.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        write(&self.archives, path.to_owned(), buffer.freeze());
        Ok(())
    }

    async fn exists_archive(&self, path: &str) -> Result<bool> {
        validate_archive_path(path)?;
        Ok(self
            .archives
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path))
    }
}
