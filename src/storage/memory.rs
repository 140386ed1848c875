use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{BlobVersionedStore, DEFAULT_PAGE_SIZE, FetchedObject, Result, StorageError, VersionListing};

#[derive(Debug, Clone)]
struct StoredVersion {
    version: String,
    data: Vec<u8>,
}

/// An in-memory versioned blob store.
///
/// Useful for testing and development.
#[derive(Debug, Clone)]
pub struct MemoryBlobStore {
    // Versions are kept oldest first
    objects: Arc<DashMap<(String, String), Vec<StoredVersion>>>,
    page_size: usize,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self {
            objects: Arc::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit how many versions a listing returns before it is truncated
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Store a new version of an object and return its generated version id.
    pub fn put(&self, bucket: &str, object: &str, data: impl Into<Vec<u8>>) -> String {
        let version = Uuid::new_v4().simple().to_string();
        self.put_version(bucket, object, &version, data);
        version
    }

    /// Store a new version of an object under a chosen version id.
    pub fn put_version(
        &self,
        bucket: &str,
        object: &str,
        version: &str,
        data: impl Into<Vec<u8>>,
    ) {
        self.objects
            .entry((bucket.to_string(), object.to_string()))
            .or_default()
            .push(StoredVersion {
                version: version.to_string(),
                data: data.into(),
            });
    }
}

#[async_trait]
impl BlobVersionedStore for MemoryBlobStore {
    async fn fetch(
        &self,
        bucket: &str,
        object: &str,
        version: Option<&str>,
    ) -> Result<FetchedObject> {
        let key = (bucket.to_string(), object.to_string());
        let Some(versions) = self.objects.get(&key) else {
            return Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            });
        };

        let found = match version {
            Some(version) => versions.iter().rev().find(|v| v.version == version),
            None => versions.last(),
        };

        found
            .map(|v| FetchedObject {
                data: v.data.clone(),
                version: v.version.clone(),
            })
            .ok_or_else(|| StorageError::VersionNotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
                version: version.unwrap_or_default().to_string(),
            })
    }

    async fn list_versions(&self, bucket: &str, object: &str) -> Result<VersionListing> {
        let key = (bucket.to_string(), object.to_string());
        let Some(versions) = self.objects.get(&key) else {
            return Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            });
        };

        Ok(VersionListing {
            versions: versions
                .iter()
                .rev()
                .take(self.page_size)
                .map(|v| v.version.clone())
                .collect(),
            is_truncated: versions.len() > self.page_size,
        })
    }
}
