use std::collections::HashSet;
use std::path::PathBuf;

use bytes::Bytes;

use super::cancel::{CancelToken, Cancelled};
use super::context::VaultContext;
use super::import::{ImportObjectError, ObjectImporter};
use super::lifecycle;
use crate::backend::BackendError;
use crate::crypto::{EncryptionError, Iv};
use crate::hash::{HashError, ObjectHash};
use crate::mirror::MirrorError;
use crate::object::{meta_path_for, MetaError, MetaRecord, SyncState, VaultObject};
use crate::repository::RepoError;

#[derive(Debug, thiserror::Error)]
pub enum SyncObjectError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),
    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),
    #[error("meta record error: {0}")]
    Meta(#[from] MetaError),
    #[error("backend returned an invalid hash: {0}")]
    InvalidHash(#[from] HashError),
    #[error("failed to import child: {0}")]
    Import(#[from] ImportObjectError),
    #[error("backend returned no bytes for {0}")]
    EmptyDownload(ObjectHash),
    #[error("meta of {0} does not describe the recorded content")]
    MetaMismatch(ObjectHash),
    #[error("local bytes no longer hash to {expected} (got {actual})")]
    HashMismatch {
        expected: ObjectHash,
        actual: ObjectHash,
    },
    #[error("object {0} was never uploaded")]
    NotOnBackend(ObjectHash),
    #[error("object {0} has no local copy")]
    NotLocal(ObjectHash),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Moves object bytes between the local mirror and the backend.
#[derive(Debug, Clone)]
pub struct SyncReconciler {
    ctx: VaultContext,
    importer: ObjectImporter,
}

impl SyncReconciler {
    pub fn new(ctx: VaultContext, importer: ObjectImporter) -> Self {
        Self { ctx, importer }
    }

    /// Fetch both halves of `object` into the mirror.
    ///
    /// An object that is already synced with both local files present is
    /// returned as is without touching the backend. Nothing is written
    /// locally until both halves have been downloaded and decrypted.
    pub async fn sync_from_backend(
        &self,
        object: &VaultObject,
        cancel: &CancelToken,
    ) -> Result<VaultObject, SyncObjectError> {
        if object.sync_state == SyncState::Synced && self.local_copy_present(object).await? {
            tracing::trace!(meta_hash = %object.meta_hash, "already synced");
            return Ok(object.clone());
        }
        if !object.sync_state.is_remote() {
            return Err(SyncObjectError::NotOnBackend(object.meta_hash));
        }

        cancel.check("download content")?;
        let content = self.fetch(&object.content_hash, &object.content_iv).await?;
        cancel.check("download meta")?;
        let meta_plain = self.fetch(&object.meta_hash, &object.meta_iv).await?;
        let meta = MetaRecord::decode(&meta_plain)?;
        if meta.content_hash != object.content_hash {
            return Err(SyncObjectError::MetaMismatch(object.meta_hash));
        }

        let local_path = self.resolve_local_path(object).await?;
        let local_meta_path = meta_path_for(&local_path);
        cancel.check("write local copy")?;
        self.ctx.mirror.write(&local_path, &content, true).await?;
        self.ctx
            .mirror
            .write(&local_meta_path, &meta_plain, true)
            .await?;

        let mut synced = object.clone();
        synced.local_path = Some(local_path);
        synced.local_meta_path = Some(local_meta_path);
        synced.decrypted_size = content.len() as u64;
        synced.sync_state = self.directory_state(&synced).await?;
        self.ctx.repo.update(&synced).await?;

        tracing::info!(
            meta_hash = %synced.meta_hash,
            sync_state = %synced.sync_state,
            size = synced.decrypted_size,
            "pulled object"
        );
        Ok(synced)
    }

    /// Pull `object` and every descendant, importing children that have no
    /// row yet. Directory states are settled bottom-up once all pulls are
    /// done.
    pub async fn sync_tree_from_backend(
        &self,
        object: &VaultObject,
        cancel: &CancelToken,
    ) -> Result<VaultObject, SyncObjectError> {
        let mut seen = HashSet::new();
        let mut pulled = Vec::new();
        let mut stack = vec![object.clone()];

        while let Some(node) = stack.pop() {
            if !seen.insert(node.meta_hash) {
                continue;
            }
            let node = match node.sync_state {
                SyncState::UnsyncedOnlyLocal => node,
                SyncState::None => {
                    tracing::warn!(meta_hash = %node.meta_hash, "skipping object present nowhere");
                    continue;
                }
                _ => self.sync_from_backend(&node, cancel).await?,
            };

            for child in node.children() {
                let row = match self.ctx.repo.get(&child.meta_hash).await? {
                    Some(row) => row,
                    None => {
                        self.importer
                            .import(&child.meta_hash, &child.meta_iv, false)
                            .await?
                    }
                };
                stack.push(row);
            }
            pulled.push(node.meta_hash);
        }

        for hash in pulled.iter().rev() {
            let Some(mut row) = self.ctx.repo.get(hash).await? else {
                continue;
            };
            if !row.is_directory() || !row.sync_state.is_remote() {
                continue;
            }
            let state = self.directory_state(&row).await?;
            if state != row.sync_state {
                row.sync_state = state;
                self.ctx.repo.update(&row).await?;
            }
        }

        self.ctx
            .repo
            .get(&object.meta_hash)
            .await?
            .ok_or_else(|| RepoError::NotFound(object.meta_hash).into())
    }

    /// Promote a local-only object onto the backend.
    ///
    /// Local bytes are resealed with the keys and nonces already on record,
    /// so the uploaded hashes must equal the recorded ones and no parent
    /// needs rebuilding. Objects that are already remote are returned as is.
    pub async fn sync_to_backend(
        &self,
        object: &VaultObject,
        cancel: &CancelToken,
    ) -> Result<VaultObject, SyncObjectError> {
        match object.sync_state {
            SyncState::UnsyncedOnlyLocal => {}
            SyncState::None => return Err(SyncObjectError::NotLocal(object.meta_hash)),
            _ => return Ok(object.clone()),
        }
        let (Some(path), Some(meta_path)) = (&object.local_path, &object.local_meta_path) else {
            return Err(SyncObjectError::NotLocal(object.meta_hash));
        };

        let content = self.ctx.mirror.read(path).await?;
        let meta_plain = self.ctx.mirror.read(meta_path).await?;
        if MetaRecord::decode(&meta_plain)?.content_hash != object.content_hash {
            return Err(SyncObjectError::MetaMismatch(object.meta_hash));
        }

        cancel.check("upload content")?;
        self.promote(&object.content_hash, &content, &object.name)
            .await?;
        cancel.check("upload meta")?;
        self.promote(&object.meta_hash, &meta_plain, &object.name)
            .await?;

        let mut synced = object.clone();
        synced.sync_state = SyncState::Synced;
        self.ctx.repo.update(&synced).await?;
        tracing::info!(meta_hash = %synced.meta_hash, "pushed object");
        Ok(synced)
    }

    /// Push every local-only descendant of `object`, then `object` itself.
    pub async fn sync_tree_to_backend(
        &self,
        object: &VaultObject,
        cancel: &CancelToken,
    ) -> Result<VaultObject, SyncObjectError> {
        let descendants = lifecycle::collect_subtree(&self.ctx, object, false).await?;
        for descendant in descendants.iter().rev() {
            self.sync_to_backend(descendant, cancel).await?;
        }
        self.sync_to_backend(object, cancel).await
    }

    async fn promote(
        &self,
        hash: &ObjectHash,
        plaintext: &[u8],
        label: &str,
    ) -> Result<(), SyncObjectError> {
        let bundle = self.ctx.crypto.lookup_bundle_by_hash(hash).await?;
        let ciphertext = self.ctx.crypto.reseal(&bundle, plaintext).await?;
        let reported = self
            .ctx
            .backend
            .upload(Bytes::from(ciphertext), false)
            .await?;
        let actual = ObjectHash::parse(&reported)?;
        if actual != *hash {
            return Err(SyncObjectError::HashMismatch {
                expected: *hash,
                actual,
            });
        }
        lifecycle::pin(&self.ctx, hash, label).await?;
        Ok(())
    }

    async fn fetch(&self, hash: &ObjectHash, iv: &Iv) -> Result<Vec<u8>, SyncObjectError> {
        let ciphertext = self.ctx.backend.download(hash).await?;
        if ciphertext.is_empty() {
            return Err(SyncObjectError::EmptyDownload(*hash));
        }
        Ok(self.ctx.crypto.decrypt_blob(hash, iv, &ciphertext).await?)
    }

    async fn local_copy_present(&self, object: &VaultObject) -> Result<bool, SyncObjectError> {
        let (Some(path), Some(meta_path)) = (&object.local_path, &object.local_meta_path) else {
            return Ok(false);
        };
        Ok(self.ctx.mirror.exists(path).await? && self.ctx.mirror.exists(meta_path).await?)
    }

    /// Existing local path, else under the first parent that has one, else
    /// `<type root>/<name>`.
    async fn resolve_local_path(&self, object: &VaultObject) -> Result<PathBuf, SyncObjectError> {
        if let Some(path) = &object.local_path {
            return Ok(path.clone());
        }
        if object.is_root() {
            return Ok(object.object_type.root_path());
        }
        for parent in self.ctx.repo.get_parents(&object.meta_hash).await? {
            if parent.is_root() {
                return Ok(object.object_type.root_path());
            }
            if let Some(dir) = &parent.local_path {
                return Ok(dir.join(&object.name));
            }
        }
        Ok(object.object_type.root_path().join(&object.name))
    }

    /// `Synced`, or `UnsyncedOnlyPartly` for a directory with any child that
    /// is not fully local.
    async fn directory_state(&self, object: &VaultObject) -> Result<SyncState, SyncObjectError> {
        for child in object.children() {
            let complete = match self.ctx.repo.get(&child.meta_hash).await? {
                Some(row) => matches!(
                    row.sync_state,
                    SyncState::Synced | SyncState::UnsyncedOnlyLocal
                ),
                None => false,
            };
            if !complete {
                return Ok(SyncState::UnsyncedOnlyPartly);
            }
        }
        Ok(SyncState::Synced)
    }
}
