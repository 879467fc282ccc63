use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::backend::{BackendError, ContentBackend, MemoryBackend};
use crate::hash::ObjectHash;

/// Every call a [`CountingBackend`] has seen, in order per kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendCalls {
    pub uploads: Vec<ObjectHash>,
    pub hash_only_uploads: Vec<ObjectHash>,
    pub downloads: Vec<ObjectHash>,
    pub pins: Vec<ObjectHash>,
    pub unpins: Vec<ObjectHash>,
}

impl BackendCalls {
    /// Calls that would reach the network. Hash-only uploads are local.
    pub fn network_calls(&self) -> usize {
        self.uploads.len() + self.downloads.len() + self.pins.len() + self.unpins.len()
    }

    pub fn unpins_of(&self, hash: &ObjectHash) -> usize {
        self.unpins.iter().filter(|h| *h == hash).count()
    }
}

#[derive(Debug, Default)]
struct Faults {
    refuse_unpin: HashSet<ObjectHash>,
    empty_download: HashSet<ObjectHash>,
    fail_uploads: bool,
    uploads_left: Option<usize>,
    fail_downloads: bool,
    refuse_pins: bool,
}

/// [`MemoryBackend`] wrapper that records calls and injects failures.
#[derive(Debug, Clone, Default)]
pub struct CountingBackend {
    inner: MemoryBackend,
    calls: Arc<Mutex<BackendCalls>>,
    faults: Arc<Mutex<Faults>>,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    pub fn calls(&self) -> BackendCalls {
        self.calls.lock().clone()
    }

    pub fn reset_calls(&self) {
        *self.calls.lock() = BackendCalls::default();
    }

    /// Make `unpin(hash)` answer `false`.
    pub fn refuse_unpin(&self, hash: ObjectHash) {
        self.faults.lock().refuse_unpin.insert(hash);
    }

    pub fn allow_unpin(&self, hash: &ObjectHash) {
        self.faults.lock().refuse_unpin.remove(hash);
    }

    /// Make `download(hash)` return zero bytes.
    pub fn empty_download(&self, hash: ObjectHash) {
        self.faults.lock().empty_download.insert(hash);
    }

    /// Also clears any [`CountingBackend::fail_uploads_after`] budget.
    pub fn fail_uploads(&self, fail: bool) {
        let mut faults = self.faults.lock();
        faults.fail_uploads = fail;
        faults.uploads_left = None;
    }

    /// Accept `count` more real uploads, then fail every one after.
    pub fn fail_uploads_after(&self, count: usize) {
        self.faults.lock().uploads_left = Some(count);
    }

    pub fn fail_downloads(&self, fail: bool) {
        self.faults.lock().fail_downloads = fail;
    }

    pub fn refuse_pins(&self, refuse: bool) {
        self.faults.lock().refuse_pins = refuse;
    }
}

#[async_trait]
impl ContentBackend for CountingBackend {
    async fn upload(&self, data: Bytes, hash_only: bool) -> Result<String, BackendError> {
        let hash = ObjectHash::digest(&data);
        {
            let mut calls = self.calls.lock();
            if hash_only {
                calls.hash_only_uploads.push(hash);
            } else {
                calls.uploads.push(hash);
            }
        }
        if !hash_only {
            let mut faults = self.faults.lock();
            let exhausted = match faults.uploads_left.as_mut() {
                Some(0) => true,
                Some(left) => {
                    *left -= 1;
                    false
                }
                None => false,
            };
            if faults.fail_uploads || exhausted {
                return Err(BackendError::UploadFailed("injected upload failure".to_string()));
            }
        }
        self.inner.upload(data, hash_only).await
    }

    async fn download(&self, hash: &ObjectHash) -> Result<Bytes, BackendError> {
        self.calls.lock().downloads.push(*hash);
        {
            let faults = self.faults.lock();
            if faults.fail_downloads {
                return Err(BackendError::DownloadFailed(
                    "injected download failure".to_string(),
                ));
            }
            if faults.empty_download.contains(hash) {
                return Ok(Bytes::new());
            }
        }
        self.inner.download(hash).await
    }

    async fn pin(&self, hash: &ObjectHash, label: &str) -> Result<bool, BackendError> {
        self.calls.lock().pins.push(*hash);
        if self.faults.lock().refuse_pins {
            return Ok(false);
        }
        self.inner.pin(hash, label).await
    }

    async fn unpin(&self, hash: &ObjectHash) -> Result<bool, BackendError> {
        self.calls.lock().unpins.push(*hash);
        if self.faults.lock().refuse_unpin.contains(hash) {
            return Ok(false);
        }
        self.inner.unpin(hash).await
    }
}
