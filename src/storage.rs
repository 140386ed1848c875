//! Versioned blob storage holding published CRL shards.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

mod fs;
mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

/// Number of versions returned in one listing page by default
pub const DEFAULT_PAGE_SIZE: usize = 1000;

type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object {bucket}/{object} not found")]
    ObjectNotFound { bucket: String, object: String },

    #[error("version {version} of {bucket}/{object} not found")]
    VersionNotFound {
        bucket: String,
        object: String,
        version: String,
    },

    #[error("too many versions of {bucket}/{object} and pagination not implemented")]
    PaginationUnsupported { bucket: String, object: String },

    #[error("current version {version} of {bucket}/{object} wasn't found in listing")]
    CurrentVersionNotListed {
        bucket: String,
        object: String,
        version: String,
    },

    #[error("{bucket}/{object} version {version} has no previous version")]
    NoPreviousVersion {
        bucket: String,
        object: String,
        version: String,
    },

    #[error("invalid storage key {0:?}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One version of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedObject {
    pub data: Vec<u8>,
    pub version: String,
}

/// A single page of an object's versions, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionListing {
    pub versions: Vec<String>,
    pub is_truncated: bool,
}

/// Abstract interface for a versioned object store.
#[async_trait]
pub trait BlobVersionedStore: Send + Sync {
    /// Fetch an object at `version`, or the latest version if `None`.
    async fn fetch(&self, bucket: &str, object: &str, version: Option<&str>)
    -> Result<FetchedObject>;

    /// List the first page of versions of an object, newest first.
    async fn list_versions(&self, bucket: &str, object: &str) -> Result<VersionListing>;

    /// Find the version published immediately before `version`.
    ///
    /// Only the first listing page is searched.
    async fn previous(&self, bucket: &str, object: &str, version: &str) -> Result<String> {
        let listing = self.list_versions(bucket, object).await?;
        let previous = find_previous(&listing, bucket, object, version)?;
        debug!(bucket, object, version, previous = %previous, "found previous version");
        Ok(previous)
    }
}

fn find_previous(
    listing: &VersionListing,
    bucket: &str,
    object: &str,
    version: &str,
) -> Result<String> {
    let position = listing.versions.iter().position(|v| v == version);
    let previous = position.and_then(|i| listing.versions.get(i + 1));

    match (position, previous) {
        (Some(_), Some(previous)) => Ok(previous.clone()),
        _ if listing.is_truncated => Err(StorageError::PaginationUnsupported {
            bucket: bucket.to_string(),
            object: object.to_string(),
        }),
        (None, _) => Err(StorageError::CurrentVersionNotListed {
            bucket: bucket.to_string(),
            object: object.to_string(),
            version: version.to_string(),
        }),
        (Some(_), None) => Err(StorageError::NoPreviousVersion {
            bucket: bucket.to_string(),
            object: object.to_string(),
            version: version.to_string(),
        }),
    }
}
