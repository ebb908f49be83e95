//! The image storage seam used by the try-on pipeline.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageResult;

/// Object storage with upload and time-limited signed URL issuance.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Store `data` at `path`.
    async fn upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Issue a URL granting read access to `path` for `ttl`.
    async fn signed_download_url(&self, path: &str, ttl: Duration) -> StorageResult<String>;
}
