use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::{BlobVersionedStore, DEFAULT_PAGE_SIZE, FetchedObject, Result, StorageError, VersionListing};

/// A versioned blob store backed by a local directory.
///
/// Every object is a directory at `{root}/{bucket}/{object}` holding one file
/// per version. Version ids start with a zero-padded nanosecond timestamp so
/// sorting them by name orders them by age.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    page_size: usize,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Write a new version of an object and return its version id.
    pub async fn put(&self, bucket: &str, object: &str, data: &[u8]) -> Result<String> {
        let dir = self.object_dir(bucket, object)?;
        fs::create_dir_all(&dir).await?;

        let version = format!(
            "{:020}-{}",
            OffsetDateTime::now_utc().unix_timestamp_nanos(),
            Uuid::new_v4().simple()
        );
        fs::write(dir.join(&version), data).await?;
        debug!(bucket, object, version = %version, len = data.len(), "stored object version");
        Ok(version)
    }

    fn object_dir(&self, bucket: &str, object: &str) -> Result<PathBuf> {
        let bucket = validate_key(bucket)?;
        let object = validate_key(object)?;
        Ok(self.root.join(bucket).join(object))
    }

    /// All version ids of an object, newest first.
    async fn versions(&self, bucket: &str, object: &str) -> Result<Vec<String>> {
        let dir = self.object_dir(bucket, object)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                versions.push(name.to_string());
            }
        }
        if versions.is_empty() {
            return Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            });
        }
        versions.sort_unstable_by(|a, b| b.cmp(a));
        Ok(versions)
    }
}

/// Reject keys that would escape the store root.
fn validate_key(key: &str) -> Result<&Path> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if valid {
        Ok(path)
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

#[async_trait]
impl BlobVersionedStore for FsBlobStore {
    async fn fetch(
        &self,
        bucket: &str,
        object: &str,
        version: Option<&str>,
    ) -> Result<FetchedObject> {
        let version = match version {
            Some(version) => {
                validate_key(version)?;
                version.to_string()
            }
            None => {
                let mut versions = self.versions(bucket, object).await?;
                versions.swap_remove(0)
            }
        };

        let path = self.object_dir(bucket, object)?.join(&version);
        match fs::read(&path).await {
            Ok(data) => {
                debug!(bucket, object, version = %version, len = data.len(), "fetched object");
                Ok(FetchedObject { data, version })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::VersionNotFound {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                    version,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_versions(&self, bucket: &str, object: &str) -> Result<VersionListing> {
        let mut versions = self.versions(bucket, object).await?;
        let is_truncated = versions.len() > self.page_size;
        versions.truncate(self.page_size);
        Ok(VersionListing {
            versions,
            is_truncated,
        })
    }
}
