//! Object repository contract
//!
//! The repository is the single source of truth for object rows. Rows are
//! keyed by `meta_hash`; children are reachable through a row's `objects`
//! list and parents through the reverse index answered by
//! [`ObjectRepository::get_parents`].

mod memory;

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::hash::ObjectHash;
use crate::object::{ObjectType, VaultObject};

pub use memory::MemoryObjectRepository;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("object table error: {0}")]
    IpfsObject(String),
    #[error("pinning error: {0}")]
    Pinning(String),
    #[error("encryption bundle error: {0}")]
    EncryptionBundle(String),
    #[error("a root for type {0} already exists")]
    DuplicateRoot(ObjectType),
    #[error("object {0} not found")]
    NotFound(ObjectHash),
}

#[async_trait]
pub trait ObjectRepository: Send + Sync + std::fmt::Debug {
    async fn get(&self, meta_hash: &ObjectHash) -> Result<Option<VaultObject>, RepoError>;

    async fn get_by_content_hash(
        &self,
        content_hash: &ObjectHash,
    ) -> Result<Option<VaultObject>, RepoError>;

    async fn exists(&self, meta_hash: &ObjectHash) -> Result<bool, RepoError> {
        Ok(self.get(meta_hash).await?.is_some())
    }

    async fn exists_content(&self, content_hash: &ObjectHash) -> Result<bool, RepoError> {
        Ok(self.get_by_content_hash(content_hash).await?.is_some())
    }

    /// Every object whose child list contains `child_meta_hash`.
    async fn get_parents(&self, child_meta_hash: &ObjectHash)
        -> Result<Vec<VaultObject>, RepoError>;

    /// The `Root(T)` sentinel for the namespace of `object_type`, if created.
    async fn get_root(&self, object_type: &ObjectType) -> Result<Option<VaultObject>, RepoError>;

    async fn get_by_local_path(&self, path: &Path) -> Result<Option<VaultObject>, RepoError>;

    /// Insert a new row. A second `Root(T)` is rejected with
    /// [`RepoError::DuplicateRoot`].
    async fn insert(&self, object: &VaultObject) -> Result<(), RepoError>;

    /// Overwrite the local-only fields (and anything else) of an existing row.
    async fn update(&self, object: &VaultObject) -> Result<(), RepoError>;

    /// Atomically remove the row `old_meta_hash` and insert `new`.
    async fn replace(&self, old_meta_hash: &ObjectHash, new: &VaultObject)
        -> Result<(), RepoError>;

    /// Delete a row. Returns whether it existed.
    async fn delete(&self, meta_hash: &ObjectHash) -> Result<bool, RepoError>;

    async fn list(&self) -> Result<Vec<VaultObject>, RepoError>;

    /// Subscribe to the full listing, re-published after every write.
    fn watch(&self) -> watch::Receiver<Vec<VaultObject>>;
}
