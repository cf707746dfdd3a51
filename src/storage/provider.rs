use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Content store for encrypted blobs, addressed by the opaque file id
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store the blob. Either the whole blob lands under `id` or nothing does.
    async fn put(&self, id: &str, data: Bytes) -> Result<()>;

    /// Read the blob, failing with `BlobNotFound` when absent
    async fn get(&self, id: &str) -> Result<Bytes>;

    /// Remove the blob. Removing an absent blob succeeds.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Check if a blob exists
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Get the storage type name
    fn storage_type(&self) -> &'static str;
}
