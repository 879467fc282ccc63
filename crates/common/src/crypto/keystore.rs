use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::secret::{Secret, SecretError};

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("key store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("key store secret error: {0}")]
    Secret(#[from] SecretError),
    #[error("invalid key name: {0}")]
    InvalidName(String),
}

/// Secure storage for named symmetric keys.
#[async_trait]
pub trait KeyStore: Send + Sync + std::fmt::Debug {
    /// Fetch the key stored under `name`, generating and storing a new one if absent.
    async fn get_or_create_key(&self, name: &str) -> Result<Secret, KeyStoreError>;

    /// Fetch the key stored under `name` without creating it.
    async fn get_key(&self, name: &str) -> Result<Option<Secret>, KeyStoreError>;

    /// Remove the key stored under `name`. Returns whether a key was removed.
    async fn delete_key(&self, name: &str) -> Result<bool, KeyStoreError>;
}

/// In-memory key store. Keys disappear with the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    keys: Arc<RwLock<HashMap<String, Secret>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get_or_create_key(&self, name: &str) -> Result<Secret, KeyStoreError> {
        if let Some(secret) = self.keys.read().get(name) {
            return Ok(secret.clone());
        }
        let mut keys = self.keys.write();
        // another writer may have raced us between the two locks
        if let Some(secret) = keys.get(name) {
            return Ok(secret.clone());
        }
        let secret = Secret::generate()?;
        keys.insert(name.to_string(), secret.clone());
        Ok(secret)
    }

    async fn get_key(&self, name: &str) -> Result<Option<Secret>, KeyStoreError> {
        Ok(self.keys.read().get(name).cloned())
    }

    async fn delete_key(&self, name: &str) -> Result<bool, KeyStoreError> {
        Ok(self.keys.write().remove(name).is_some())
    }
}

/// File backed key store: one hex encoded key per file under `dir`.
#[derive(Debug, Clone)]
pub struct FsKeyStore {
    dir: PathBuf,
    // serializes get-or-create so two tasks never mint different keys for one name
    create_lock: Arc<tokio::sync::Mutex<()>>,
}

impl FsKeyStore {
    pub async fn open(dir: &Path) -> Result<Self, KeyStoreError> {
        tokio::fs::create_dir_all(dir).await?;
        Ok(Self {
            dir: dir.to_path_buf(),
            create_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    fn key_path(&self, name: &str) -> Result<PathBuf, KeyStoreError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !name.starts_with('.');
        if !valid {
            return Err(KeyStoreError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{}.key", name)))
    }

    async fn read_key(&self, path: &Path) -> Result<Option<Secret>, KeyStoreError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(Secret::from_hex(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_key(&self, path: &Path, secret: &Secret) -> Result<(), KeyStoreError> {
        tokio::fs::write(path, secret.to_hex()).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl KeyStore for FsKeyStore {
    async fn get_or_create_key(&self, name: &str) -> Result<Secret, KeyStoreError> {
        let path = self.key_path(name)?;
        let _guard = self.create_lock.lock().await;
        if let Some(secret) = self.read_key(&path).await? {
            return Ok(secret);
        }
        let secret = Secret::generate()?;
        self.write_key(&path, &secret).await?;
        tracing::debug!(key = %name, "generated new key");
        Ok(secret)
    }

    async fn get_key(&self, name: &str) -> Result<Option<Secret>, KeyStoreError> {
        let path = self.key_path(name)?;
        self.read_key(&path).await
    }

    async fn delete_key(&self, name: &str) -> Result<bool, KeyStoreError> {
        let path = self.key_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
