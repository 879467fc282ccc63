use std::path::PathBuf;

use bytes::Bytes;
use chrono::Utc;

use super::cancel::{CancelToken, Cancelled};
use super::context::VaultContext;
use super::lifecycle::{self, LocalSnapshot, Staged};
use super::mutator::ManipulateObjectError;
use crate::backend::BackendError;
use crate::crypto::{EncryptionBundle, EncryptionError, Iv};
use crate::hash::{HashError, ObjectHash};
use crate::mirror::MirrorError;
use crate::object::{
    meta_path_for, ChildRef, MetaError, MetaRecord, ObjectType, SyncState, VaultObject,
    ROOT_SENTINEL_NAME,
};
use crate::repository::RepoError;

/// Key label for content blobs
pub const CONTENT_KEY_LABEL: &str = "content";
/// Key label for meta blobs
pub const META_KEY_LABEL: &str = "meta";

#[derive(Debug, thiserror::Error)]
pub enum CreateObjectError {
    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),
    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("backend returned an invalid hash: {0}")]
    InvalidHash(#[from] HashError),
    #[error("meta record error: {0}")]
    Meta(#[from] MetaError),
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),
    #[error("failed to retire the superseded root sentinel: {0}")]
    Retire(#[source] Box<ManipulateObjectError>),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Everything the create pipeline needs to produce one object version.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub data: Bytes,
    pub name: String,
    pub object_type: ObjectType,
    pub local_path: Option<PathBuf>,
    pub overwrite: bool,
    /// `(meta hash, version)` of the version this one supersedes
    pub previous: Option<(ObjectHash, u64)>,
    pub only_locally: bool,
    pub objects: Option<Vec<ChildRef>>,
}

impl CreateRequest {
    pub fn new(name: impl Into<String>, object_type: ObjectType, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            name: name.into(),
            object_type,
            local_path: None,
            overwrite: false,
            previous: None,
            only_locally: false,
            objects: None,
        }
    }

    /// An empty directory-like object.
    pub fn directory(name: impl Into<String>, object_type: ObjectType) -> Self {
        Self::new(name, object_type, Bytes::new()).children(Some(Vec::new()))
    }

    pub fn at(self, path: impl Into<PathBuf>) -> Self {
        self.at_path(Some(path.into()))
    }

    pub fn at_path(mut self, path: Option<PathBuf>) -> Self {
        self.local_path = path;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Continue the lineage of `object`.
    pub fn previous_version(mut self, object: &VaultObject) -> Self {
        self.previous = Some((object.meta_hash, object.version));
        self
    }

    pub fn only_locally(mut self, only_locally: bool) -> Self {
        self.only_locally = only_locally;
        self
    }

    pub fn children(mut self, objects: Option<Vec<ChildRef>>) -> Self {
        self.objects = objects;
        self
    }
}

/// The create pipeline: mirror, seal, upload, describe, seal, upload, persist.
#[derive(Debug, Clone)]
pub struct ObjectBuilder {
    ctx: VaultContext,
}

impl ObjectBuilder {
    pub fn new(ctx: VaultContext) -> Self {
        Self { ctx }
    }

    /// Create and persist a new object, lazily creating the type's root
    /// sentinel and repointing it when the object sits at the type's root
    /// path.
    ///
    /// A failure leaves no row, pin, bundle or key behind, and the mirror
    /// paths hold what they held before, so the same request can be retried.
    pub async fn create(
        &self,
        request: CreateRequest,
        cancel: &CancelToken,
    ) -> Result<VaultObject, CreateObjectError> {
        Ok(self.create_staged(request, cancel).await?.object)
    }

    /// [`ObjectBuilder::create`], keeping what the mirror held before so a
    /// caller whose follow-up step fails can unwind the new version.
    pub(crate) async fn create_staged(
        &self,
        request: CreateRequest,
        cancel: &CancelToken,
    ) -> Result<Staged, CreateObjectError> {
        if !request.object_type.is_root() {
            self.ensure_root(&request.object_type, request.only_locally, cancel)
                .await?;
        }

        let staged = self.build_staged(request, cancel).await?;
        match self.persist(&staged.object, cancel).await {
            Ok(()) => {}
            // the row and the new root are in place, only the old root lingers
            Err(e @ CreateObjectError::Retire(_)) => return Err(e),
            Err(e) => {
                staged.unwind(&self.ctx).await;
                return Err(e);
            }
        }

        let object = &staged.object;
        tracing::info!(
            meta_hash = %object.meta_hash,
            name = %object.name,
            version = object.version,
            sync_state = %object.sync_state,
            "created object"
        );
        Ok(staged)
    }

    async fn persist(&self, object: &VaultObject, cancel: &CancelToken) -> Result<(), CreateObjectError> {
        cancel.check("persist")?;
        self.ctx.repo.insert(object).await?;
        self.attach_to_root(object, cancel).await
    }

    /// Produce a new object version without persisting it.
    pub async fn build(
        &self,
        request: CreateRequest,
        cancel: &CancelToken,
    ) -> Result<VaultObject, CreateObjectError> {
        Ok(self.build_staged(request, cancel).await?.object)
    }

    /// Build a version, remembering what its mirror paths held. On failure
    /// those paths are put back and nothing stays pinned.
    pub(crate) async fn build_staged(
        &self,
        request: CreateRequest,
        cancel: &CancelToken,
    ) -> Result<Staged, CreateObjectError> {
        let snapshot = LocalSnapshot::capture(&self.ctx, request.local_path.as_deref()).await?;
        match self.build_inner(request, cancel).await {
            Ok(object) => Ok(Staged { object, snapshot }),
            Err(e) => {
                snapshot.restore(&self.ctx).await;
                Err(e)
            }
        }
    }

    async fn build_inner(
        &self,
        request: CreateRequest,
        cancel: &CancelToken,
    ) -> Result<VaultObject, CreateObjectError> {
        let CreateRequest {
            data,
            name,
            object_type,
            local_path,
            overwrite,
            previous,
            only_locally,
            objects,
        } = request;
        tracing::debug!(%name, %object_type, only_locally, "building object");

        cancel.check("write content")?;
        if let Some(path) = &local_path {
            self.ctx.mirror.write(path, &data, overwrite).await?;
        }

        let (content_hash, content_iv) = self
            .seal_and_upload(&data, CONTENT_KEY_LABEL, &name, only_locally, cancel)
            .await?;

        let meta = MetaRecord {
            content_hash,
            previous_version_hash: previous.map(|(hash, _)| hash),
            version: previous.map_or(1, |(_, version)| version + 1),
            object_type,
            name,
            timestamp: Utc::now().timestamp_millis(),
            decrypted_size: data.len() as u64,
            content_iv,
            objects,
        };
        let local_meta_path = local_path.as_deref().map(meta_path_for);
        let (meta_hash, meta_iv) =
            match self.seal_meta(&meta, local_meta_path.as_deref(), only_locally, cancel).await {
                Ok(sealed) => sealed,
                Err(e) => {
                    lifecycle::release_blob(&self.ctx, &content_hash, !only_locally).await;
                    return Err(e);
                }
            };

        let sync_state = match (only_locally, local_path.is_some()) {
            (true, true) => SyncState::UnsyncedOnlyLocal,
            (true, false) => SyncState::None,
            (false, false) => SyncState::UnsyncedOnlyRemote,
            (false, true) => SyncState::Synced,
        };
        Ok(VaultObject::from_meta(
            meta_hash,
            meta_iv,
            meta,
            sync_state,
            local_path,
            local_meta_path,
        ))
    }

    async fn seal_meta(
        &self,
        meta: &MetaRecord,
        local_meta_path: Option<&std::path::Path>,
        only_locally: bool,
        cancel: &CancelToken,
    ) -> Result<(ObjectHash, Iv), CreateObjectError> {
        let meta_bytes = meta.encode()?;
        cancel.check("write meta")?;
        if let Some(path) = local_meta_path {
            self.ctx.mirror.write(path, &meta_bytes, true).await?;
        }
        self.seal_and_upload(&meta_bytes, META_KEY_LABEL, &meta.name, only_locally, cancel)
            .await
    }

    /// Fetch the `Root(T)` sentinel for `object_type`, creating it if absent.
    pub async fn ensure_root(
        &self,
        object_type: &ObjectType,
        only_locally: bool,
        cancel: &CancelToken,
    ) -> Result<VaultObject, CreateObjectError> {
        if let Some(root) = self.ctx.repo.get_root(object_type).await? {
            return Ok(root);
        }

        let root_type = object_type.root_type();
        let request = CreateRequest::directory(ROOT_SENTINEL_NAME, root_type.clone())
            .at(root_type.root_path())
            .overwrite(true)
            .only_locally(only_locally);
        let staged = self.build_staged(request, cancel).await?;
        let root = &staged.object;

        if let Err(e) = cancel.check("persist root") {
            staged.unwind(&self.ctx).await;
            return Err(e.into());
        }
        match self.ctx.repo.insert(root).await {
            Ok(()) => {
                tracing::info!(meta_hash = %root.meta_hash, %root_type, "created root sentinel");
                Ok(staged.object)
            }
            Err(RepoError::DuplicateRoot(_)) => {
                tracing::warn!(%root_type, "root sentinel appeared concurrently, reusing it");
                // the winner owns the root path now, only our blobs go
                lifecycle::discard(&self.ctx, root).await;
                self.ctx
                    .repo
                    .get_root(object_type)
                    .await?
                    .ok_or_else(|| RepoError::NotFound(root.meta_hash).into())
            }
            Err(e) => {
                staged.unwind(&self.ctx).await;
                Err(e.into())
            }
        }
    }

    /// Point the type's root sentinel at `object` if it sits at the root path.
    /// A root that lists the previous version is left to parent propagation.
    async fn attach_to_root(
        &self,
        object: &VaultObject,
        cancel: &CancelToken,
    ) -> Result<(), CreateObjectError> {
        let root_path = object.object_type.root_path();
        if object.is_root() || object.local_path.as_deref() != Some(root_path.as_path()) {
            return Ok(());
        }
        let Some(root) = self.ctx.repo.get_root(&object.object_type).await? else {
            return Ok(());
        };
        let listed = |hash: Option<ObjectHash>| hash.is_some_and(|h| root.references(&h));
        if root.children() == [object.child_ref()] || listed(object.previous_version_hash) {
            return Ok(());
        }

        let request = CreateRequest::directory(root.name.clone(), root.object_type.clone())
            .at_path(root.local_path.clone())
            .overwrite(true)
            .previous_version(&root)
            .only_locally(object.sync_state == SyncState::UnsyncedOnlyLocal)
            .children(Some(vec![object.child_ref()]));
        let staged = self.build_staged(request, cancel).await?;
        let new_root = &staged.object;

        let swapped = match cancel.check("swap root") {
            Ok(()) => self
                .ctx
                .repo
                .replace(&root.meta_hash, new_root)
                .await
                .map_err(CreateObjectError::from),
            Err(e) => Err(CreateObjectError::from(e)),
        };
        if let Err(e) = swapped {
            staged.unwind(&self.ctx).await;
            return Err(e);
        }
        lifecycle::retire(&self.ctx, &root, Some(new_root))
            .await
            .map_err(|e| CreateObjectError::Retire(Box::new(e)))?;
        tracing::debug!(
            root = %new_root.meta_hash,
            child = %object.meta_hash,
            "repointed root sentinel"
        );
        Ok(())
    }

    async fn seal_and_upload(
        &self,
        data: &[u8],
        key_label: &str,
        pin_label: &str,
        only_locally: bool,
        cancel: &CancelToken,
    ) -> Result<(ObjectHash, Iv), CreateObjectError> {
        cancel.check("encrypt")?;
        let (ciphertext, bundle) = self.ctx.crypto.encrypt(data, key_label).await?;

        match self
            .upload_sealed(ciphertext, &bundle, pin_label, only_locally, cancel)
            .await
        {
            Ok(hash) => {
                tracing::debug!(%hash, key_label, only_locally, "uploaded sealed blob");
                Ok((hash, bundle.iv))
            }
            Err(e) => {
                if let Err(discard) = self.ctx.crypto.discard(&bundle).await {
                    tracing::warn!(key = %bundle.key_name, error = %discard, "failed to drop unused bundle");
                }
                Err(e)
            }
        }
    }

    async fn upload_sealed(
        &self,
        ciphertext: Vec<u8>,
        bundle: &EncryptionBundle,
        pin_label: &str,
        only_locally: bool,
        cancel: &CancelToken,
    ) -> Result<ObjectHash, CreateObjectError> {
        cancel.check("upload")?;
        let reported = self
            .ctx
            .backend
            .upload(Bytes::from(ciphertext), only_locally)
            .await?;
        let hash = ObjectHash::parse(&reported)?;
        if !only_locally {
            lifecycle::pin(&self.ctx, &hash, pin_label).await?;
        }

        if let Err(e) = self.ctx.crypto.patch_hash(bundle, &hash).await {
            lifecycle::release_blob(&self.ctx, &hash, !only_locally).await;
            return Err(e.into());
        }
        Ok(hash)
    }
}
