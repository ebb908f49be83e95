//! In-memory image store for local runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::keys::validate_key;
use crate::store::ImageStore;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
}

/// Keeps objects in a map and issues `memory://` URLs.
#[derive(Debug, Default)]
pub struct MemoryImageStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    signing_down: AtomicBool,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a signer outage: every `signed_download_url` call fails.
    pub fn set_signing_down(&self, down: bool) {
        self.signing_down.store(down, Ordering::SeqCst);
    }

    pub async fn get(&self, path: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .read()
            .await
            .get(path)
            .map(|o| (o.data.clone(), o.content_type.clone()))
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        validate_key(path)?;
        self.objects.write().await.insert(
            path.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn signed_download_url(&self, path: &str, ttl: Duration) -> StorageResult<String> {
        if self.signing_down.load(Ordering::SeqCst) {
            return Err(StorageError::presign_failed("signer unavailable"));
        }
        validate_key(path)?;
        Ok(format!("memory://{}?ttl={}", path, ttl.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_and_sign() {
        let store = MemoryImageStore::new();
        store
            .upload("results/u1/1-a.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();

        let (data, content_type) = store.get("results/u1/1-a.png").await.unwrap();
        assert_eq!(data, vec![1, 2, 3]);
        assert_eq!(content_type, "image/png");

        let url = store
            .signed_download_url("results/u1/1-a.png", Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(url, "memory://results/u1/1-a.png?ttl=3600");
    }

    #[tokio::test]
    async fn test_signing_outage() {
        let store = MemoryImageStore::new();
        store.set_signing_down(true);
        let err = store
            .signed_download_url("results/u1/1-a.png", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::PresignFailed(_)));
    }
}
