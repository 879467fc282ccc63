//! Error types for the vault store.

use common::backend::BackendError;
use common::repository::RepoError;

/// Errors that can occur when working with the vault store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Object storage error
    #[error("object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row no longer decodes into its domain type
    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// S3 bucket not found - must be created before use
    #[error("S3 bucket '{0}' does not exist. Create it before opening the vault.")]
    BucketNotFound(String),
}

impl StoreError {
    pub(crate) fn corrupt(table: &'static str, reason: impl ToString) -> Self {
        StoreError::Corrupt {
            table,
            reason: reason.to_string(),
        }
    }
}

impl From<StoreError> for RepoError {
    fn from(err: StoreError) -> Self {
        RepoError::IpfsObject(err.to_string())
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

pub(crate) fn upload_failed(err: StoreError) -> BackendError {
    BackendError::UploadFailed(err.to_string())
}

pub(crate) fn download_failed(err: StoreError) -> BackendError {
    BackendError::DownloadFailed(err.to_string())
}

pub(crate) fn pin_failed(err: StoreError) -> BackendError {
    BackendError::Pinning(err.to_string())
}
