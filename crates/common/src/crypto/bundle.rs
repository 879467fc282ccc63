use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::secret::Iv;
use crate::hash::ObjectHash;
use crate::repository::RepoError;

/// Record tying a sealed blob to the key and nonce that open it.
///
/// A bundle is created at encryption time, before the blob has been uploaded,
/// so `hash` starts out empty and is patched in once the backend reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionBundle {
    pub id: Uuid,
    pub hash: Option<ObjectHash>,
    pub key_name: String,
    pub iv: Iv,
}

impl EncryptionBundle {
    pub fn new(key_name: String, iv: Iv) -> Self {
        Self {
            id: Uuid::new_v4(),
            hash: None,
            key_name,
            iv,
        }
    }
}

/// Persistent table of [`EncryptionBundle`]s, indexed by id and by hash.
#[async_trait]
pub trait BundleStore: Send + Sync + std::fmt::Debug {
    async fn insert(&self, bundle: &EncryptionBundle) -> Result<(), RepoError>;

    /// Record the uploaded hash for a bundle created before the upload.
    async fn patch_hash(&self, id: Uuid, hash: &ObjectHash) -> Result<(), RepoError>;

    async fn get_by_hash(
        &self,
        hash: &ObjectHash,
    ) -> Result<Option<EncryptionBundle>, RepoError>;

    /// Delete one bundle. Returns whether it existed.
    async fn delete(&self, id: Uuid) -> Result<bool, RepoError>;

    /// Delete every bundle recorded for `hash`, returning the removed rows.
    async fn delete_by_hash(
        &self,
        hash: &ObjectHash,
    ) -> Result<Vec<EncryptionBundle>, RepoError>;

    /// Number of bundles still referring to the key named `key_name`.
    async fn count_by_key_name(&self, key_name: &str) -> Result<usize, RepoError>;
}

/// In-memory bundle table
#[derive(Debug, Clone, Default)]
pub struct MemoryBundleStore {
    inner: Arc<RwLock<HashMap<Uuid, EncryptionBundle>>>,
}

impl MemoryBundleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[async_trait]
impl BundleStore for MemoryBundleStore {
    async fn insert(&self, bundle: &EncryptionBundle) -> Result<(), RepoError> {
        self.inner.write().insert(bundle.id, bundle.clone());
        Ok(())
    }

    async fn patch_hash(&self, id: Uuid, hash: &ObjectHash) -> Result<(), RepoError> {
        let mut inner = self.inner.write();
        let bundle = inner
            .get_mut(&id)
            .ok_or_else(|| RepoError::EncryptionBundle(format!("bundle {} not found", id)))?;
        bundle.hash = Some(*hash);
        Ok(())
    }

    async fn get_by_hash(
        &self,
        hash: &ObjectHash,
    ) -> Result<Option<EncryptionBundle>, RepoError> {
        Ok(self
            .inner
            .read()
            .values()
            .find(|b| b.hash.as_ref() == Some(hash))
            .cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepoError> {
        Ok(self.inner.write().remove(&id).is_some())
    }

    async fn delete_by_hash(
        &self,
        hash: &ObjectHash,
    ) -> Result<Vec<EncryptionBundle>, RepoError> {
        let mut inner = self.inner.write();
        let ids: Vec<Uuid> = inner
            .values()
            .filter(|b| b.hash.as_ref() == Some(hash))
            .map(|b| b.id)
            .collect();
        Ok(ids.iter().filter_map(|id| inner.remove(id)).collect())
    }

    async fn count_by_key_name(&self, key_name: &str) -> Result<usize, RepoError> {
        Ok(self
            .inner
            .read()
            .values()
            .filter(|b| b.key_name == key_name)
            .count())
    }
}
