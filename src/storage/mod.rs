//! Blob storage for normalized images
//!
//! Writes encoded images to S3-compatible object storage (DigitalOcean
//! Spaces, MinIO, AWS) under caller-chosen paths and resolves display URLs.
//! Also offers versioned reads and compare-and-swap writes, which the
//! catalog uses to keep its JSON collections in the same bucket.

pub mod client;
pub mod mock;

pub use client::S3BlobStore;
pub use mock::MockBlobStore;

use crate::models::StorageReference;
use crate::Result;
use async_trait::async_trait;

/// Object bytes plus the version tag (ETag) they were read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub version: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Durably write `data` at `path`. Never overwrites an existing blob.
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<StorageReference>;

    /// Retrieval URL for a stored blob; may be time-bounded.
    async fn get_url(&self, reference: &StorageReference) -> Result<String>;

    async fn delete(&self, reference: &StorageReference) -> Result<()>;

    /// Read the object at `path`, or `None` if there is none.
    async fn read(&self, path: &str) -> Result<Option<StoredObject>>;

    /// Write `data` at `path` only if the object is still at `expected_version`
    /// (`None`: only if it does not exist yet). Fails with
    /// `Error::PreconditionFailed` when another writer got there first.
    async fn write_if(
        &self,
        path: &str,
        data: &[u8],
        content_type: &str,
        expected_version: Option<&str>,
    ) -> Result<()>;
}

/// Delete a blob whose owning record may already be gone; failures are only logged.
pub async fn delete_best_effort(store: &dyn BlobStore, reference: &StorageReference) {
    match store.delete(reference).await {
        Ok(()) => tracing::info!("Deleted image {}", reference),
        Err(e) => tracing::warn!("Failed to delete image {}: {}", reference, e),
    }
}
