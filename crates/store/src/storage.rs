//! Where sealed blob bytes live: memory, a local directory, or an
//! S3-compatible bucket.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use common::hash::ObjectHash;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

const BLOB_PREFIX: &str = "blobs";
const DEFAULT_REGION: &str = "us-east-1";

/// Blob storage selected in `config.toml` under `[backend]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    /// Nothing survives the process
    #[default]
    Memory,

    Local {
        path: PathBuf,
    },

    /// AWS S3 or anything speaking its API (MinIO, R2, ...)
    S3 {
        endpoint: String,
        access_key: String,
        secret_key: String,
        bucket: String,
        /// Defaults to us-east-1
        region: Option<String>,
    },
}

/// Content-addressed view over an [`ObjectStore`]: one object per hash
/// under `blobs/`.
#[derive(Debug, Clone)]
pub(crate) struct Storage {
    inner: Arc<dyn ObjectStore>,
}

impl Storage {
    pub async fn new(config: &ObjectStoreConfig) -> Result<Self> {
        let inner = match config {
            ObjectStoreConfig::Memory => Arc::new(InMemory::new()) as Arc<dyn ObjectStore>,
            ObjectStoreConfig::Local { path } => local_store(path).await?,
            ObjectStoreConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
            } => {
                let store = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key)
                    .with_bucket_name(bucket)
                    .with_region(region.as_deref().unwrap_or(DEFAULT_REGION))
                    .with_allow_http(endpoint.starts_with("http://"))
                    .build()
                    .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
                let store: Arc<dyn ObjectStore> = Arc::new(store);
                check_bucket(store.as_ref(), bucket).await?;
                store
            }
        };
        Ok(Self { inner })
    }

    fn location(hash: &ObjectHash) -> ObjectPath {
        ObjectPath::from(format!("{}/{}", BLOB_PREFIX, hash))
    }

    pub async fn put(&self, hash: &ObjectHash, data: Bytes) -> Result<()> {
        self.inner.put(&Self::location(hash), data.into()).await?;
        Ok(())
    }

    pub async fn get(&self, hash: &ObjectHash) -> Result<Option<Bytes>> {
        let found = match self.inner.get(&Self::location(hash)).await {
            Ok(found) => found,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(found.bytes().await?))
    }

    pub async fn exists(&self, hash: &ObjectHash) -> Result<bool> {
        match self.inner.head(&Self::location(hash)).await {
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            other => other.map(|_| true).map_err(Into::into),
        }
    }

    /// Returns whether the blob was there.
    pub async fn delete(&self, hash: &ObjectHash) -> Result<bool> {
        let present = self.exists(hash).await?;
        if present {
            match self.inner.delete(&Self::location(hash)).await {
                // lost a race with another delete; still gone
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(present)
    }

    /// Hashes of every stored blob, as text.
    pub async fn list(&self) -> Result<Vec<String>> {
        let prefix = ObjectPath::from(BLOB_PREFIX);
        let mut names: Vec<String> = self
            .inner
            .list(Some(&prefix))
            .map_ok(|meta| meta.location.filename().unwrap_or_default().to_string())
            .try_collect()
            .await?;
        names.retain(|name| !name.is_empty());
        Ok(names)
    }
}

async fn local_store(path: &std::path::Path) -> Result<Arc<dyn ObjectStore>> {
    tokio::fs::create_dir_all(path).await?;
    let store = LocalFileSystem::new_with_prefix(path)
        .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
    Ok(Arc::new(store))
}

/// Listing the (possibly empty) bucket is the cheapest request that fails
/// when it does not exist.
async fn check_bucket(store: &dyn ObjectStore, bucket: &str) -> Result<()> {
    let root = ObjectPath::from("");
    match store.list(Some(&root)).try_next().await {
        Ok(_) => Ok(()),
        Err(object_store::Error::NotFound { .. }) => {
            Err(StoreError::BucketNotFound(bucket.to_string()))
        }
        Err(e) if e.to_string().contains("NoSuchBucket") => {
            Err(StoreError::BucketNotFound(bucket.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
