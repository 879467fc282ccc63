//! Pipelines over the object graph, and the [`Vault`] facade that
//! serializes them per lineage.
//!
//! - [`ObjectBuilder`]: the create pipeline
//! - [`ObjectMutator`]: edits, deletes and bottom-up propagation
//! - [`SyncReconciler`]: pulls and pushes between mirror and backend
//! - [`ObjectImporter`]: registers objects known only by meta hash and nonce
//!
//! The pipelines themselves take no locks. [`Vault`] takes the lineage locks
//! of every type namespace a call can reach, and its importer locks each
//! object it registers.

mod builder;
mod cancel;
mod context;
mod import;
mod lifecycle;
mod lineage;
mod mutator;
mod sync;

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;

use crate::backend::{ContentBackend, MemoryBackend};
use crate::crypto::{
    BundleStore, EncryptionError, EncryptionService, Iv, KeyNaming, KeyStore, MemoryBundleStore,
    MemoryKeyStore,
};
use crate::hash::ObjectHash;
use crate::mirror::LocalMirror;
use crate::object::{ObjectType, VaultObject};
use crate::repository::{MemoryObjectRepository, ObjectRepository, RepoError};

pub use builder::{
    CreateObjectError, CreateRequest, ObjectBuilder, CONTENT_KEY_LABEL, META_KEY_LABEL,
};
pub use cancel::{CancelHandle, CancelToken, Cancelled};
pub use context::VaultContext;
pub use import::{ImportObjectError, ObjectImporter};
pub use lineage::{LineageGuard, LineageLocks};
pub use mutator::{ManipulateObjectError, ObjectMutator};
pub use sync::{SyncObjectError, SyncReconciler};

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error(transparent)]
    Create(#[from] CreateObjectError),
    #[error(transparent)]
    Manipulate(#[from] ManipulateObjectError),
    #[error(transparent)]
    Sync(#[from] SyncObjectError),
    #[error(transparent)]
    Import(#[from] ImportObjectError),
    #[error(transparent)]
    Encryption(#[from] EncryptionError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("object {0} not found")]
    NotFound(ObjectHash),
    #[error("vault is missing its {0}")]
    MissingComponent(&'static str),
}

/// Assembles a [`Vault`]. Everything but the mirror defaults to an
/// in-memory implementation.
#[derive(Debug, Default)]
pub struct VaultBuilder {
    repository: Option<Arc<dyn ObjectRepository>>,
    backend: Option<Arc<dyn ContentBackend>>,
    mirror: Option<Arc<dyn LocalMirror>>,
    key_store: Option<Arc<dyn KeyStore>>,
    bundle_store: Option<Arc<dyn BundleStore>>,
    key_naming: KeyNaming,
}

impl VaultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repository(mut self, repository: Arc<dyn ObjectRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ContentBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn mirror(mut self, mirror: Arc<dyn LocalMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn key_store(mut self, key_store: Arc<dyn KeyStore>) -> Self {
        self.key_store = Some(key_store);
        self
    }

    pub fn bundle_store(mut self, bundle_store: Arc<dyn BundleStore>) -> Self {
        self.bundle_store = Some(bundle_store);
        self
    }

    pub fn key_naming(mut self, key_naming: KeyNaming) -> Self {
        self.key_naming = key_naming;
        self
    }

    pub fn build(self) -> Result<Vault, VaultError> {
        let mirror = self.mirror.ok_or(VaultError::MissingComponent("mirror"))?;
        let crypto = EncryptionService::new(
            self.key_store
                .unwrap_or_else(|| Arc::new(MemoryKeyStore::new())),
            self.bundle_store
                .unwrap_or_else(|| Arc::new(MemoryBundleStore::new())),
            self.key_naming,
        );
        let ctx = VaultContext {
            repo: self
                .repository
                .unwrap_or_else(|| Arc::new(MemoryObjectRepository::new())),
            backend: self
                .backend
                .unwrap_or_else(|| Arc::new(MemoryBackend::new())),
            mirror,
            crypto,
        };
        Ok(Vault::new(ctx))
    }
}

/// Entry point for callers: every operation takes the lineage locks of the
/// object's namespace and of every ancestor's, so edits racing on the same
/// tree run one after another.
#[derive(Debug, Clone)]
pub struct Vault {
    ctx: VaultContext,
    builder: ObjectBuilder,
    mutator: ObjectMutator,
    reconciler: SyncReconciler,
    importer: ObjectImporter,
    locks: LineageLocks,
}

impl Vault {
    pub fn builder() -> VaultBuilder {
        VaultBuilder::new()
    }

    pub fn new(ctx: VaultContext) -> Self {
        let builder = ObjectBuilder::new(ctx.clone());
        let locks = LineageLocks::new();
        Self {
            mutator: ObjectMutator::new(ctx.clone(), builder.clone()),
            // pulls already run under the lock of the tree being pulled
            reconciler: SyncReconciler::new(ctx.clone(), ObjectImporter::new(ctx.clone())),
            importer: ObjectImporter::with_locks(ctx.clone(), locks.clone()),
            builder,
            locks,
            ctx,
        }
    }

    pub fn context(&self) -> &VaultContext {
        &self.ctx
    }

    pub async fn get(&self, meta_hash: &ObjectHash) -> Result<VaultObject, VaultError> {
        self.ctx
            .repo
            .get(meta_hash)
            .await?
            .ok_or(VaultError::NotFound(*meta_hash))
    }

    pub async fn find_by_path(&self, path: &Path) -> Result<Option<VaultObject>, VaultError> {
        Ok(self.ctx.repo.get_by_local_path(path).await?)
    }

    pub async fn root(&self, object_type: &ObjectType) -> Result<Option<VaultObject>, VaultError> {
        Ok(self.ctx.repo.get_root(object_type).await?)
    }

    pub async fn list(&self) -> Result<Vec<VaultObject>, VaultError> {
        Ok(self.ctx.repo.list().await?)
    }

    pub fn watch(&self) -> watch::Receiver<Vec<VaultObject>> {
        self.ctx.repo.watch()
    }

    /// Create an object and, when the directory holding its local path is a
    /// known object, add it to that directory. If adding it fails the new
    /// object is unwound again.
    pub async fn create(
        &self,
        request: CreateRequest,
        cancel: &CancelToken,
    ) -> Result<VaultObject, VaultError> {
        let (_guard, parent) = loop {
            let mut namespaces = BTreeSet::from([request.object_type.namespace()]);
            if let Some(parent) = self.parent_directory(&request).await? {
                namespaces.extend(self.namespaces_above(&parent).await?);
            }
            let guard = self.locks.lock_all(&namespaces).await;

            let parent = self.parent_directory(&request).await?;
            let covered = match &parent {
                Some(parent) => self.namespaces_above(parent).await?.is_subset(&namespaces),
                None => true,
            };
            if covered {
                break (guard, parent);
            }
            tracing::debug!(name = %request.name, "parent lineage changed while locking, retrying");
        };

        let staged = self.builder.create_staged(request, cancel).await?;
        if let Some(parent) = parent {
            if let Err(e) = self.mutator.add_child(&parent, &staged.object, cancel).await {
                if !e.is_committed() {
                    staged.unwind(&self.ctx).await;
                }
                return Err(e.into());
            }
        }
        Ok(staged.object)
    }

    pub async fn read(&self, meta_hash: &ObjectHash) -> Result<Vec<u8>, VaultError> {
        let object = self.get(meta_hash).await?;
        Ok(self.mutator.load_content(&object).await?)
    }

    pub async fn update_content(
        &self,
        meta_hash: &ObjectHash,
        data: impl Into<Bytes>,
        cancel: &CancelToken,
    ) -> Result<VaultObject, VaultError> {
        let (_guard, object) = self.lock_object(meta_hash).await?;
        Ok(self.mutator.update_content(&object, data, cancel).await?)
    }

    pub async fn rename(
        &self,
        meta_hash: &ObjectHash,
        new_name: &str,
        cancel: &CancelToken,
    ) -> Result<VaultObject, VaultError> {
        let (_guard, object) = self.lock_object(meta_hash).await?;
        Ok(self.mutator.rename(&object, new_name, cancel).await?)
    }

    pub async fn delete(
        &self,
        meta_hash: &ObjectHash,
        only_locally: bool,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<Option<VaultObject>, VaultError> {
        let (_guard, object) = self.lock_object(meta_hash).await?;
        Ok(self
            .mutator
            .delete(&object, only_locally, force, cancel)
            .await?)
    }

    pub async fn add_child(
        &self,
        parent: &ObjectHash,
        child: &ObjectHash,
        cancel: &CancelToken,
    ) -> Result<VaultObject, VaultError> {
        let (_guard, parent) = self.lock_object(parent).await?;
        let child = self.get(child).await?;
        Ok(self.mutator.add_child(&parent, &child, cancel).await?)
    }

    pub async fn remove_child(
        &self,
        parent: &ObjectHash,
        child: &ObjectHash,
        cancel: &CancelToken,
    ) -> Result<VaultObject, VaultError> {
        let (_guard, parent) = self.lock_object(parent).await?;
        Ok(self.mutator.remove_child(&parent, child, cancel).await?)
    }

    /// Fetch an object (and with `recursive`, its whole tree) into the mirror.
    pub async fn pull(
        &self,
        meta_hash: &ObjectHash,
        recursive: bool,
        cancel: &CancelToken,
    ) -> Result<VaultObject, VaultError> {
        let (_guard, object) = self.lock_object(meta_hash).await?;
        let pulled = if recursive {
            self.reconciler.sync_tree_from_backend(&object, cancel).await?
        } else {
            self.reconciler.sync_from_backend(&object, cancel).await?
        };
        Ok(pulled)
    }

    /// Upload a local-only object (and with `recursive`, its whole tree).
    pub async fn push(
        &self,
        meta_hash: &ObjectHash,
        recursive: bool,
        cancel: &CancelToken,
    ) -> Result<VaultObject, VaultError> {
        let (_guard, object) = self.lock_object(meta_hash).await?;
        let pushed = if recursive {
            self.reconciler.sync_tree_to_backend(&object, cancel).await?
        } else {
            self.reconciler.sync_to_backend(&object, cancel).await?
        };
        Ok(pushed)
    }

    pub async fn import(
        &self,
        meta_hash: &ObjectHash,
        meta_iv: &Iv,
        recursive: bool,
    ) -> Result<VaultObject, VaultError> {
        Ok(self.importer.import(meta_hash, meta_iv, recursive).await?)
    }

    /// Take the lineage locks of the object and its ancestors, then re-read
    /// the row so the caller works on the version current under the locks.
    async fn lock_object(
        &self,
        meta_hash: &ObjectHash,
    ) -> Result<(LineageGuard, VaultObject), VaultError> {
        loop {
            let namespaces = self.namespaces_above(&self.get(meta_hash).await?).await?;
            let guard = self.locks.lock_all(&namespaces).await;

            let object = self.get(meta_hash).await?;
            if self.namespaces_above(&object).await?.is_subset(&namespaces) {
                return Ok((guard, object));
            }
            tracing::debug!(%meta_hash, "lineage changed while locking, retrying");
        }
    }

    /// Namespaces of `object` and of everything that lists it, transitively.
    async fn namespaces_above(&self, object: &VaultObject) -> Result<BTreeSet<ObjectType>, VaultError> {
        let mut namespaces = BTreeSet::from([object.object_type.namespace()]);
        let mut seen = HashSet::from([object.meta_hash]);
        let mut queue = VecDeque::from([object.meta_hash]);
        while let Some(hash) = queue.pop_front() {
            for parent in self.ctx.repo.get_parents(&hash).await? {
                if seen.insert(parent.meta_hash) {
                    namespaces.insert(parent.object_type.namespace());
                    queue.push_back(parent.meta_hash);
                }
            }
        }
        Ok(namespaces)
    }

    /// The known directory that will list an object created by `request`.
    async fn parent_directory(
        &self,
        request: &CreateRequest,
    ) -> Result<Option<VaultObject>, VaultError> {
        let root_path = request.object_type.root_path();
        let dir = request
            .local_path
            .as_deref()
            .filter(|p| *p != root_path)
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty());
        let Some(dir) = dir else {
            return Ok(None);
        };
        Ok(self
            .ctx
            .repo
            .get_by_local_path(dir)
            .await?
            .filter(|parent| parent.is_directory() && !parent.is_root()))
    }
}
