//! Local byte mirror
//!
//! Plaintext copies of object bytes, addressed by paths relative to the
//! mirror root. A zero-length write creates a directory, and reading a
//! directory yields zero bytes.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("file already exists: {0}")]
    Exists(PathBuf),
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error("path escapes the mirror root: {0}")]
    InvalidPath(PathBuf),
    #[error("mirror i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait LocalMirror: Send + Sync + std::fmt::Debug {
    async fn write(&self, path: &Path, data: &[u8], overwrite: bool) -> Result<(), MirrorError>;

    async fn read(&self, path: &Path) -> Result<Vec<u8>, MirrorError>;

    async fn exists(&self, path: &Path) -> Result<bool, MirrorError>;

    /// Remove a file or a whole directory. Missing paths are not an error.
    async fn remove(&self, path: &Path) -> Result<(), MirrorError>;

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), MirrorError>;
}

/// [`LocalMirror`] over a directory on disk
#[derive(Debug, Clone)]
pub struct FsMirror {
    root: PathBuf,
}

impl FsMirror {
    pub async fn open(root: &Path) -> Result<Self, MirrorError> {
        tokio::fs::create_dir_all(root).await?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf, MirrorError> {
        let relative = path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !relative || path.as_os_str().is_empty() {
            return Err(MirrorError::InvalidPath(path.to_path_buf()));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl LocalMirror for FsMirror {
    async fn write(&self, path: &Path, data: &[u8], overwrite: bool) -> Result<(), MirrorError> {
        let full = self.resolve(path)?;
        if !overwrite && tokio::fs::try_exists(&full).await? {
            return Err(MirrorError::Exists(path.to_path_buf()));
        }

        if data.is_empty() {
            if tokio::fs::metadata(&full).await.is_ok_and(|m| m.is_file()) {
                tokio::fs::remove_file(&full).await?;
            }
            tokio::fs::create_dir_all(&full).await?;
            return Ok(());
        }

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::metadata(&full).await.is_ok_and(|m| m.is_dir()) {
            tokio::fs::remove_dir_all(&full).await?;
        }
        tokio::fs::write(&full, data).await?;
        tracing::trace!(path = %path.display(), size = data.len(), "mirrored bytes");
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, MirrorError> {
        let full = self.resolve(path)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => Ok(Vec::new()),
            Ok(_) => Ok(tokio::fs::read(&full).await?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MirrorError::NotFound(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &Path) -> Result<bool, MirrorError> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full).await?)
    }

    async fn remove(&self, path: &Path) -> Result<(), MirrorError> {
        let full = self.resolve(path)?;
        let result = match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&full).await,
            Ok(_) => tokio::fs::remove_file(&full).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), MirrorError> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if !tokio::fs::try_exists(&source).await? {
            return Err(MirrorError::NotFound(from.to_path_buf()));
        }
        if tokio::fs::try_exists(&target).await? {
            return Err(MirrorError::Exists(to.to_path_buf()));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&source, &target).await?;
        Ok(())
    }
}
