//! Content-addressed backend contract
//!
//! The engine never chooses a hash itself: it hands ciphertext to a
//! [`ContentBackend`] and takes back whatever address the backend reports.

mod memory;

use async_trait::async_trait;
use bytes::Bytes;

use crate::hash::ObjectHash;

pub use memory::MemoryBackend;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("upload failed: {0}")]
    UploadFailed(String),
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("pin service error: {0}")]
    Pinning(String),
}

/// Immutable blob storage addressed by hash.
#[async_trait]
pub trait ContentBackend: Send + Sync + std::fmt::Debug {
    /// Store `data` and return its address as text. With `hash_only` the
    /// backend computes the address without storing anything.
    async fn upload(&self, data: Bytes, hash_only: bool) -> Result<String, BackendError>;

    async fn download(&self, hash: &ObjectHash) -> Result<Bytes, BackendError>;

    /// Ask the backend to retain `hash`. Returns whether the pin was accepted.
    async fn pin(&self, hash: &ObjectHash, label: &str) -> Result<bool, BackendError>;

    /// Release a pin. A hash that holds no pin counts as released, so a
    /// repeated release answers `true`; `false` means the backend refused.
    async fn unpin(&self, hash: &ObjectHash) -> Result<bool, BackendError>;
}
