use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{BackendError, ContentBackend};
use crate::hash::ObjectHash;

#[derive(Debug, Default)]
struct Inner {
    blobs: HashMap<ObjectHash, Bytes>,
    pins: HashMap<ObjectHash, String>,
}

/// In-process blob store. Unpinning a blob drops it immediately.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &ObjectHash) -> bool {
        self.inner.read().blobs.contains_key(hash)
    }

    /// Label of the pin held on `hash`, if any.
    pub fn pin_label(&self, hash: &ObjectHash) -> Option<String> {
        self.inner.read().pins.get(hash).cloned()
    }

    pub fn blob_count(&self) -> usize {
        self.inner.read().blobs.len()
    }

    pub fn pin_count(&self) -> usize {
        self.inner.read().pins.len()
    }
}

#[async_trait]
impl ContentBackend for MemoryBackend {
    async fn upload(&self, data: Bytes, hash_only: bool) -> Result<String, BackendError> {
        let hash = ObjectHash::digest(&data);
        if !hash_only {
            self.inner.write().blobs.insert(hash, data);
        }
        Ok(hash.to_string())
    }

    async fn download(&self, hash: &ObjectHash) -> Result<Bytes, BackendError> {
        self.inner
            .read()
            .blobs
            .get(hash)
            .cloned()
            .ok_or_else(|| BackendError::DownloadFailed(format!("blob {} not found", hash)))
    }

    async fn pin(&self, hash: &ObjectHash, label: &str) -> Result<bool, BackendError> {
        let mut inner = self.inner.write();
        if !inner.blobs.contains_key(hash) {
            return Ok(false);
        }
        inner.pins.insert(*hash, label.to_string());
        Ok(true)
    }

    async fn unpin(&self, hash: &ObjectHash) -> Result<bool, BackendError> {
        let mut inner = self.inner.write();
        inner.pins.remove(hash);
        inner.blobs.remove(hash);
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_upload_download_pin() {
        let backend = MemoryBackend::new();
        let text = backend
            .upload(Bytes::from_static(b"cipher"), false)
            .await
            .unwrap();
        let hash = ObjectHash::parse(&text).unwrap();
        assert_eq!(hash, ObjectHash::digest(b"cipher"));
        assert_eq!(&backend.download(&hash).await.unwrap()[..], b"cipher");

        assert!(backend.pin(&hash, "a.txt").await.unwrap());
        assert_eq!(backend.pin_label(&hash).as_deref(), Some("a.txt"));

        assert!(backend.unpin(&hash).await.unwrap());
        assert!(!backend.contains(&hash));
        // already released
        assert!(backend.unpin(&hash).await.unwrap());
        assert!(matches!(
            backend.download(&hash).await,
            Err(BackendError::DownloadFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_hash_only_stores_nothing() {
        let backend = MemoryBackend::new();
        let text = backend
            .upload(Bytes::from_static(b"local"), true)
            .await
            .unwrap();
        let hash = ObjectHash::parse(&text).unwrap();
        assert!(!backend.contains(&hash));
        assert!(!backend.pin(&hash, "x").await.unwrap());
        assert_eq!(backend.blob_count(), 0);
    }
}
