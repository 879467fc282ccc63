use super::context::VaultContext;
use super::lineage::LineageLocks;
use crate::backend::BackendError;
use crate::crypto::{EncryptionError, Iv};
use crate::hash::ObjectHash;
use crate::object::{MetaError, MetaRecord, SyncState, VaultObject};
use crate::repository::RepoError;

#[derive(Debug, thiserror::Error)]
pub enum ImportObjectError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),
    #[error("meta record error: {0}")]
    Meta(#[from] MetaError),
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),
    #[error("backend returned no bytes for {0}")]
    EmptyDownload(ObjectHash),
}

/// Registers objects known only by `(meta hash, meta nonce)`.
///
/// The meta blob is fetched and opened through the bundle recorded for its
/// hash; the resulting row is remote-only until pulled.
#[derive(Debug, Clone)]
pub struct ObjectImporter {
    ctx: VaultContext,
    locks: Option<LineageLocks>,
}

impl ObjectImporter {
    /// An importer for callers that already hold the lineage locks.
    pub fn new(ctx: VaultContext) -> Self {
        Self { ctx, locks: None }
    }

    /// An importer that takes the namespace lock of each object before
    /// inserting its row.
    pub fn with_locks(ctx: VaultContext, locks: LineageLocks) -> Self {
        Self {
            ctx,
            locks: Some(locks),
        }
    }

    pub async fn import(
        &self,
        meta_hash: &ObjectHash,
        meta_iv: &Iv,
        recursive: bool,
    ) -> Result<VaultObject, ImportObjectError> {
        let top = self.import_one(meta_hash, meta_iv).await?;
        if !recursive {
            return Ok(top);
        }

        let mut pending: Vec<_> = top.children().to_vec();
        while let Some(child) = pending.pop() {
            let row = self.import_one(&child.meta_hash, &child.meta_iv).await?;
            pending.extend_from_slice(row.children());
        }
        Ok(top)
    }

    async fn import_one(
        &self,
        meta_hash: &ObjectHash,
        meta_iv: &Iv,
    ) -> Result<VaultObject, ImportObjectError> {
        if let Some(existing) = self.ctx.repo.get(meta_hash).await? {
            return Ok(existing);
        }

        let ciphertext = self.ctx.backend.download(meta_hash).await?;
        if ciphertext.is_empty() {
            return Err(ImportObjectError::EmptyDownload(*meta_hash));
        }
        let plaintext = self
            .ctx
            .crypto
            .decrypt_blob(meta_hash, meta_iv, &ciphertext)
            .await?;
        let meta = MetaRecord::decode(&plaintext)?;

        let _guard = match &self.locks {
            Some(locks) => Some(locks.lock(&meta.object_type).await),
            None => None,
        };
        // registered while the blob was being fetched
        if let Some(existing) = self.ctx.repo.get(meta_hash).await? {
            return Ok(existing);
        }

        let object = VaultObject::from_meta(
            *meta_hash,
            *meta_iv,
            meta,
            SyncState::UnsyncedOnlyRemote,
            None,
            None,
        );
        self.ctx.repo.insert(&object).await?;
        tracing::info!(%meta_hash, name = %object.name, "imported object");
        Ok(object)
    }
}
