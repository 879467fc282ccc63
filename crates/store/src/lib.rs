//! SQLite + object storage persistence for cairn vaults
//!
//! One SQLite database holds the object table, the child index, the
//! encryption bundles and the pin set; sealed blobs live in pluggable object
//! storage (S3/MinIO/local filesystem/memory).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use cairn_store::{ObjectStoreConfig, VaultStore};
//! use common::mirror::FsMirror;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = VaultStore::open(
//!     Path::new("/tmp/cairn/db.sqlite"),
//!     &ObjectStoreConfig::Local { path: "/tmp/cairn/blobs".into() },
//! )
//! .await?;
//! let mirror = FsMirror::open(Path::new("/tmp/cairn/mirror")).await?;
//! let vault = store.vault_builder().mirror(Arc::new(mirror)).build()?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod bundles;
mod database;
mod error;
mod objects;
mod storage;

use std::path::Path;
use std::sync::Arc;

use common::vault::VaultBuilder;

pub use backend::{BlobBackend, Pin};
pub use bundles::SqliteBundleStore;
pub use database::Database;
pub use error::{Result, StoreError};
pub use objects::SqliteObjectRepository;
pub use storage::ObjectStoreConfig;

/// Every persistent collaborator of a vault, sharing one database.
#[derive(Debug, Clone)]
pub struct VaultStore {
    pub db: Database,
    pub objects: SqliteObjectRepository,
    pub bundles: SqliteBundleStore,
    pub blobs: BlobBackend,
}

impl VaultStore {
    pub async fn open(db_path: &Path, blobs: &ObjectStoreConfig) -> Result<Self> {
        Self::with_database(Database::open(db_path).await?, blobs).await
    }

    /// Fully ephemeral store (in-memory DB + in-memory object storage).
    pub async fn ephemeral() -> Result<Self> {
        Self::with_database(Database::in_memory().await?, &ObjectStoreConfig::Memory).await
    }

    async fn with_database(db: Database, blobs: &ObjectStoreConfig) -> Result<Self> {
        Ok(Self {
            objects: SqliteObjectRepository::new(db.clone()).await?,
            bundles: SqliteBundleStore::new(db.clone()),
            blobs: BlobBackend::new(db.clone(), blobs).await?,
            db,
        })
    }

    /// A [`VaultBuilder`] wired to this store. The caller still supplies the
    /// mirror and, for anything but tests, a key store.
    pub fn vault_builder(&self) -> VaultBuilder {
        VaultBuilder::new()
            .repository(Arc::new(self.objects.clone()))
            .bundle_store(Arc::new(self.bundles.clone()))
            .backend(Arc::new(self.blobs.clone()))
    }
}
