//! SQLite-backed table of encryption bundles.

use async_trait::async_trait;
use common::crypto::{BundleStore, EncryptionBundle, Iv};
use common::hash::ObjectHash;
use common::repository::RepoError;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};

const TABLE: &str = "encryption_bundles";

#[derive(Debug, Clone)]
pub struct SqliteBundleStore {
    db: Database,
}

impl SqliteBundleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn decode(row: &SqliteRow) -> Result<EncryptionBundle> {
    let id: String = row.try_get("id")?;
    let hash: Option<String> = row.try_get("hash")?;
    let iv: String = row.try_get("iv")?;
    Ok(EncryptionBundle {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::corrupt(TABLE, e))?,
        hash: hash
            .as_deref()
            .map(ObjectHash::parse)
            .transpose()
            .map_err(|e| StoreError::corrupt(TABLE, e))?,
        key_name: row.try_get("key_name")?,
        iv: Iv::from_hex(&iv).map_err(|e| StoreError::corrupt(TABLE, e))?,
    })
}

fn bundle_err(err: impl Into<StoreError>) -> RepoError {
    RepoError::EncryptionBundle(err.into().to_string())
}

#[async_trait]
impl BundleStore for SqliteBundleStore {
    async fn insert(&self, bundle: &EncryptionBundle) -> std::result::Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO encryption_bundles (id, hash, key_name, iv, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(bundle.id.to_string())
        .bind(bundle.hash.map(|h| h.to_string()))
        .bind(&bundle.key_name)
        .bind(bundle.iv.to_hex())
        .bind(chrono::Utc::now().timestamp())
        .execute(self.db.pool())
        .await
        .map_err(bundle_err)?;
        Ok(())
    }

    async fn patch_hash(&self, id: Uuid, hash: &ObjectHash) -> std::result::Result<(), RepoError> {
        let result = sqlx::query("UPDATE encryption_bundles SET hash = ? WHERE id = ?")
            .bind(hash.to_string())
            .bind(id.to_string())
            .execute(self.db.pool())
            .await
            .map_err(bundle_err)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::EncryptionBundle(format!(
                "bundle {} not found",
                id
            )));
        }
        Ok(())
    }

    async fn get_by_hash(
        &self,
        hash: &ObjectHash,
    ) -> std::result::Result<Option<EncryptionBundle>, RepoError> {
        let row = sqlx::query(
            r#"
            SELECT id, hash, key_name, iv FROM encryption_bundles
            WHERE hash = ?
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(hash.to_string())
        .fetch_optional(self.db.pool())
        .await
        .map_err(bundle_err)?;
        row.as_ref().map(decode).transpose().map_err(bundle_err)
    }

    async fn delete(&self, id: Uuid) -> std::result::Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM encryption_bundles WHERE id = ?")
            .bind(id.to_string())
            .execute(self.db.pool())
            .await
            .map_err(bundle_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_hash(
        &self,
        hash: &ObjectHash,
    ) -> std::result::Result<Vec<EncryptionBundle>, RepoError> {
        let mut tx = self.db.pool().begin().await.map_err(bundle_err)?;
        let rows = sqlx::query("SELECT id, hash, key_name, iv FROM encryption_bundles WHERE hash = ?")
            .bind(hash.to_string())
            .fetch_all(&mut *tx)
            .await
            .map_err(bundle_err)?;
        sqlx::query("DELETE FROM encryption_bundles WHERE hash = ?")
            .bind(hash.to_string())
            .execute(&mut *tx)
            .await
            .map_err(bundle_err)?;
        tx.commit().await.map_err(bundle_err)?;

        rows.iter()
            .map(decode)
            .collect::<Result<Vec<_>>>()
            .map_err(bundle_err)
    }

    async fn count_by_key_name(&self, key_name: &str) -> std::result::Result<usize, RepoError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM encryption_bundles WHERE key_name = ?")
                .bind(key_name)
                .fetch_one(self.db.pool())
                .await
                .map_err(bundle_err)?;
        Ok(count as usize)
    }
}
