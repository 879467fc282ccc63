use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tempfile::TempDir;

use super::backend::CountingBackend;
use crate::crypto::{KeyNaming, MemoryBundleStore, MemoryKeyStore};
use crate::hash::ObjectHash;
use crate::mirror::FsMirror;
use crate::object::{ObjectType, VaultObject};
use crate::repository::{MemoryObjectRepository, ObjectRepository};
use crate::vault::{CancelToken, CreateRequest, Vault};

/// A vault over in-memory collaborators and a temporary mirror
pub struct TestVault {
    pub vault: Vault,
    pub backend: CountingBackend,
    pub repo: MemoryObjectRepository,
    pub keys: MemoryKeyStore,
    pub bundles: MemoryBundleStore,
    pub mirror: FsMirror,
    /// Held so the mirror directory lives as long as the harness
    dir: TempDir,
}

impl TestVault {
    pub async fn new() -> Result<Self> {
        Self::with_naming(KeyNaming::default()).await
    }

    pub async fn with_naming(naming: KeyNaming) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let mirror = FsMirror::open(&dir.path().join("mirror")).await?;
        let backend = CountingBackend::new();
        let repo = MemoryObjectRepository::new();
        let keys = MemoryKeyStore::new();
        let bundles = MemoryBundleStore::new();

        let vault = Vault::builder()
            .repository(Arc::new(repo.clone()))
            .backend(Arc::new(backend.clone()))
            .mirror(Arc::new(mirror.clone()))
            .key_store(Arc::new(keys.clone()))
            .bundle_store(Arc::new(bundles.clone()))
            .key_naming(naming)
            .build()?;

        Ok(Self {
            vault,
            backend,
            repo,
            keys,
            bundles,
            mirror,
            dir,
        })
    }

    /// Absolute path of a mirror-relative path
    pub fn mirror_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join("mirror").join(path)
    }

    pub async fn create_file(&self, path: &str, data: &[u8]) -> Result<VaultObject> {
        self.create(path, data, false).await
    }

    /// Create a file that is never uploaded.
    pub async fn create_local_file(&self, path: &str, data: &[u8]) -> Result<VaultObject> {
        self.create(path, data, true).await
    }

    pub async fn mkdir(&self, path: &str) -> Result<VaultObject> {
        let request = CreateRequest::directory(file_name(path)?, ObjectType::File).at(path);
        Ok(self.vault.create(request, &CancelToken::never()).await?)
    }

    /// Current row of `hash`, if it still exists.
    pub async fn current(&self, hash: &ObjectHash) -> Result<Option<VaultObject>> {
        Ok(self.repo.get(hash).await?)
    }

    /// Current row stored at `path`.
    pub async fn at(&self, path: &str) -> Result<VaultObject> {
        self.repo
            .get_by_local_path(Path::new(path))
            .await?
            .ok_or_else(|| anyhow!("no object at {}", path))
    }

    async fn create(&self, path: &str, data: &[u8], only_locally: bool) -> Result<VaultObject> {
        let request = CreateRequest::new(file_name(path)?, ObjectType::File, data.to_vec())
            .at(path)
            .only_locally(only_locally);
        Ok(self.vault.create(request, &CancelToken::never()).await?)
    }
}

fn file_name(path: &str) -> Result<String> {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("path {} has no file name", path))
}
