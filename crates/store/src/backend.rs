//! [`ContentBackend`] over object storage, with pins kept in SQLite.

use async_trait::async_trait;
use bytes::Bytes;
use common::backend::{BackendError, ContentBackend};
use common::hash::ObjectHash;
use sqlx::Row;

use crate::database::Database;
use crate::error::{download_failed, pin_failed, upload_failed, Result, StoreError};
use crate::storage::{ObjectStoreConfig, Storage};

/// A pin recorded by [`BlobBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    pub hash: ObjectHash,
    pub label: String,
    pub size: u64,
}

/// Sealed blobs in object storage, addressed by [`ObjectHash::digest`].
///
/// Releasing the last pin deletes the blob, so storage holds exactly the
/// pinned set plus whatever was uploaded and never pinned.
#[derive(Debug, Clone)]
pub struct BlobBackend {
    db: Database,
    storage: Storage,
}

impl BlobBackend {
    pub async fn new(db: Database, config: &ObjectStoreConfig) -> Result<Self> {
        let storage = Storage::new(config).await?;
        Ok(Self { db, storage })
    }

    pub async fn pins(&self) -> Result<Vec<Pin>> {
        let rows = sqlx::query("SELECT hash, label, size FROM pins ORDER BY pinned_at, hash")
            .fetch_all(self.db.pool())
            .await?;
        rows.iter()
            .map(|row| -> Result<Pin> {
                let hash: String = row.try_get("hash")?;
                Ok(Pin {
                    hash: ObjectHash::parse(&hash).map_err(|e| StoreError::corrupt("pins", e))?,
                    label: row.try_get("label")?,
                    size: row.try_get::<i64, _>("size")? as u64,
                })
            })
            .collect()
    }

    /// Hashes held by object storage, pinned or not.
    pub async fn stored(&self) -> Result<Vec<String>> {
        self.storage.list().await
    }

    async fn record_pin(&self, hash: &ObjectHash, label: &str) -> Result<bool> {
        let Some(data) = self.storage.get(hash).await? else {
            return Ok(false);
        };
        sqlx::query(
            r#"
            INSERT INTO pins (hash, label, size, pinned_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(hash) DO UPDATE SET label = excluded.label
            "#,
        )
        .bind(hash.to_string())
        .bind(label)
        .bind(data.len() as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(self.db.pool())
        .await?;
        Ok(true)
    }

    /// Drop the pin row and the blob. Returns whether anything was held.
    async fn release_pin(&self, hash: &ObjectHash) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pins WHERE hash = ?")
            .bind(hash.to_string())
            .execute(self.db.pool())
            .await?;
        let removed = self.storage.delete(hash).await?;
        Ok(result.rows_affected() > 0 || removed)
    }
}

#[async_trait]
impl ContentBackend for BlobBackend {
    async fn upload(&self, data: Bytes, hash_only: bool) -> std::result::Result<String, BackendError> {
        let hash = ObjectHash::digest(&data);
        if !hash_only {
            let size = data.len();
            self.storage.put(&hash, data).await.map_err(upload_failed)?;
            tracing::debug!(%hash, size, "stored blob");
        }
        Ok(hash.to_string())
    }

    async fn download(&self, hash: &ObjectHash) -> std::result::Result<Bytes, BackendError> {
        self.storage
            .get(hash)
            .await
            .map_err(download_failed)?
            .ok_or_else(|| BackendError::DownloadFailed(format!("blob {} not found", hash)))
    }

    async fn pin(&self, hash: &ObjectHash, label: &str) -> std::result::Result<bool, BackendError> {
        let pinned = self.record_pin(hash, label).await.map_err(pin_failed)?;
        if !pinned {
            tracing::warn!(%hash, "refusing to pin unknown blob");
        }
        Ok(pinned)
    }

    async fn unpin(&self, hash: &ObjectHash) -> std::result::Result<bool, BackendError> {
        let held = self.release_pin(hash).await.map_err(pin_failed)?;
        tracing::debug!(%hash, held, "unpinned blob");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> BlobBackend {
        let db = Database::in_memory().await.unwrap();
        BlobBackend::new(db, &ObjectStoreConfig::Memory).await.unwrap()
    }

    #[tokio::test]
    async fn test_upload_pin_unpin() {
        let backend = backend().await;
        let reported = backend
            .upload(Bytes::from_static(b"cipher"), false)
            .await
            .unwrap();
        let hash = ObjectHash::parse(&reported).unwrap();
        assert_eq!(hash, ObjectHash::digest(b"cipher"));
        assert_eq!(&backend.download(&hash).await.unwrap()[..], b"cipher");

        assert!(backend.pin(&hash, "a.txt").await.unwrap());
        let pins = backend.pins().await.unwrap();
        assert_eq!(pins.len(), 1);
        assert_eq!(pins[0].label, "a.txt");
        assert_eq!(pins[0].size, 6);

        assert!(backend.unpin(&hash).await.unwrap());
        assert!(backend.pins().await.unwrap().is_empty());
        assert!(backend.download(&hash).await.is_err());
        // releasing twice is not an error
        assert!(backend.unpin(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_hash_only_upload_stores_nothing() {
        let backend = backend().await;
        let reported = backend
            .upload(Bytes::from_static(b"cipher"), true)
            .await
            .unwrap();
        let hash = ObjectHash::parse(&reported).unwrap();
        assert!(backend.stored().await.unwrap().is_empty());
        assert!(!backend.pin(&hash, "a.txt").await.unwrap());
    }
}
