//! SQLite-backed object table.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use common::crypto::Iv;
use common::hash::ObjectHash;
use common::object::{ChildRef, ObjectType, SyncState, VaultObject};
use common::repository::{ObjectRepository, RepoError};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tokio::sync::watch;

use crate::database::Database;
use crate::error::{Result, StoreError};

const TABLE: &str = "objects";

const SELECT_OBJECTS: &str = r#"
    SELECT meta_hash, content_hash, previous_version_hash, version, object_type, name,
           timestamp, decrypted_size, sync_state, local_path, local_meta_path,
           content_iv, meta_iv, children
    FROM objects
"#;

/// [`ObjectRepository`] over the `objects` and `object_children` tables.
///
/// Every write runs in a single transaction; the full listing is re-read and
/// published to watchers after each commit.
#[derive(Debug, Clone)]
pub struct SqliteObjectRepository {
    db: Database,
    feed: Arc<watch::Sender<Vec<VaultObject>>>,
}

impl SqliteObjectRepository {
    pub async fn new(db: Database) -> Result<Self> {
        let (feed, _) = watch::channel(Vec::new());
        let repo = Self {
            db,
            feed: Arc::new(feed),
        };
        let listing = repo.fetch_all().await?;
        repo.feed.send_replace(listing);
        Ok(repo)
    }

    async fn fetch_where(&self, column: &str, value: String) -> Result<Option<VaultObject>> {
        let sql = format!("{} WHERE {} = ? LIMIT 1", SELECT_OBJECTS, column);
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn fetch_all(&self) -> Result<Vec<VaultObject>> {
        let sql = format!("{} ORDER BY timestamp, meta_hash", SELECT_OBJECTS);
        let rows = sqlx::query(&sql).fetch_all(self.db.pool()).await?;
        rows.iter().map(decode).collect()
    }

    async fn publish(&self) {
        match self.fetch_all().await {
            Ok(listing) => {
                self.feed.send_replace(listing);
            }
            Err(e) => tracing::warn!(error = %e, "failed to refresh object listing"),
        }
    }

    async fn check_root(
        tx: &mut Transaction<'_, Sqlite>,
        object: &VaultObject,
        replacing: Option<&ObjectHash>,
    ) -> std::result::Result<(), RepoError> {
        if !object.is_root() {
            return Ok(());
        }
        let existing: Option<String> =
            sqlx::query_scalar("SELECT meta_hash FROM objects WHERE object_type = ?")
                .bind(object.object_type.label())
                .fetch_optional(&mut **tx)
                .await
                .map_err(StoreError::from)?;
        let Some(existing) = existing else {
            return Ok(());
        };
        let ours = object.meta_hash.to_string();
        let replaced = replacing.map(ToString::to_string);
        if existing != ours && Some(&existing) != replaced.as_ref() {
            return Err(RepoError::DuplicateRoot(object.object_type.namespace()));
        }
        Ok(())
    }
}

fn corrupt(reason: impl ToString) -> StoreError {
    StoreError::corrupt(TABLE, reason)
}

fn decode_hash(text: &str) -> Result<ObjectHash> {
    ObjectHash::parse(text).map_err(corrupt)
}

fn decode(row: &SqliteRow) -> Result<VaultObject> {
    let text = |column: &str| -> Result<String> { Ok(row.try_get::<String, _>(column)?) };
    let optional = |column: &str| -> Result<Option<String>> {
        Ok(row.try_get::<Option<String>, _>(column)?)
    };

    let previous_version_hash = optional("previous_version_hash")?
        .as_deref()
        .map(decode_hash)
        .transpose()?;
    let objects = optional("children")?
        .map(|json| serde_json::from_str::<Vec<ChildRef>>(&json))
        .transpose()
        .map_err(corrupt)?;

    Ok(VaultObject {
        meta_hash: decode_hash(&text("meta_hash")?)?,
        content_hash: decode_hash(&text("content_hash")?)?,
        previous_version_hash,
        version: row.try_get::<i64, _>("version")? as u64,
        object_type: text("object_type")?
            .parse::<ObjectType>()
            .map_err(corrupt)?,
        name: text("name")?,
        timestamp: row.try_get("timestamp")?,
        decrypted_size: row.try_get::<i64, _>("decrypted_size")? as u64,
        sync_state: text("sync_state")?.parse::<SyncState>().map_err(corrupt)?,
        local_path: optional("local_path")?.map(PathBuf::from),
        local_meta_path: optional("local_meta_path")?.map(PathBuf::from),
        content_iv: Iv::from_hex(&text("content_iv")?).map_err(corrupt)?,
        meta_iv: Iv::from_hex(&text("meta_iv")?).map_err(corrupt)?,
        objects,
    })
}

fn path_text(path: Option<&Path>) -> Option<String> {
    path.map(|p| p.to_string_lossy().into_owned())
}

/// Insert or overwrite `object`, then rewrite its child index entries.
async fn upsert(tx: &mut Transaction<'_, Sqlite>, object: &VaultObject) -> Result<()> {
    let children = object
        .objects
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(corrupt)?;

    sqlx::query(
        r#"
        INSERT INTO objects (
            meta_hash, content_hash, previous_version_hash, version, object_type, name,
            timestamp, decrypted_size, sync_state, local_path, local_meta_path,
            content_iv, meta_iv, children
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(meta_hash) DO UPDATE SET
            content_hash = excluded.content_hash,
            previous_version_hash = excluded.previous_version_hash,
            version = excluded.version,
            object_type = excluded.object_type,
            name = excluded.name,
            timestamp = excluded.timestamp,
            decrypted_size = excluded.decrypted_size,
            sync_state = excluded.sync_state,
            local_path = excluded.local_path,
            local_meta_path = excluded.local_meta_path,
            content_iv = excluded.content_iv,
            meta_iv = excluded.meta_iv,
            children = excluded.children
        "#,
    )
    .bind(object.meta_hash.to_string())
    .bind(object.content_hash.to_string())
    .bind(object.previous_version_hash.map(|h| h.to_string()))
    .bind(object.version as i64)
    .bind(object.object_type.label())
    .bind(&object.name)
    .bind(object.timestamp)
    .bind(object.decrypted_size as i64)
    .bind(object.sync_state.as_str())
    .bind(path_text(object.local_path.as_deref()))
    .bind(path_text(object.local_meta_path.as_deref()))
    .bind(object.content_iv.to_hex())
    .bind(object.meta_iv.to_hex())
    .bind(children)
    .execute(&mut **tx)
    .await?;

    let parent = object.meta_hash.to_string();
    sqlx::query("DELETE FROM object_children WHERE parent_hash = ?")
        .bind(&parent)
        .execute(&mut **tx)
        .await?;
    for (position, child) in object.children().iter().enumerate() {
        sqlx::query(
            "INSERT INTO object_children (parent_hash, position, child_hash) VALUES (?, ?, ?)",
        )
        .bind(&parent)
        .bind(position as i64)
        .bind(child.meta_hash.to_string())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn remove(tx: &mut Transaction<'_, Sqlite>, meta_hash: &ObjectHash) -> Result<bool> {
    let hash = meta_hash.to_string();
    sqlx::query("DELETE FROM object_children WHERE parent_hash = ?")
        .bind(&hash)
        .execute(&mut **tx)
        .await?;
    let result = sqlx::query("DELETE FROM objects WHERE meta_hash = ?")
        .bind(&hash)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn db_err(err: sqlx::Error) -> RepoError {
    StoreError::from(err).into()
}

#[async_trait]
impl ObjectRepository for SqliteObjectRepository {
    async fn get(&self, meta_hash: &ObjectHash) -> std::result::Result<Option<VaultObject>, RepoError> {
        Ok(self.fetch_where("meta_hash", meta_hash.to_string()).await?)
    }

    async fn get_by_content_hash(
        &self,
        content_hash: &ObjectHash,
    ) -> std::result::Result<Option<VaultObject>, RepoError> {
        Ok(self
            .fetch_where("content_hash", content_hash.to_string())
            .await?)
    }

    async fn get_parents(
        &self,
        child_meta_hash: &ObjectHash,
    ) -> std::result::Result<Vec<VaultObject>, RepoError> {
        let sql = format!(
            "{} WHERE meta_hash IN (SELECT parent_hash FROM object_children WHERE child_hash = ?) ORDER BY meta_hash",
            SELECT_OBJECTS
        );
        let rows = sqlx::query(&sql)
            .bind(child_meta_hash.to_string())
            .fetch_all(self.db.pool())
            .await
            .map_err(db_err)?;
        let mut parents = rows
            .iter()
            .map(decode)
            .collect::<Result<Vec<_>>>()?;
        parents.sort_by_key(|p| p.meta_hash);
        Ok(parents)
    }

    async fn get_root(
        &self,
        object_type: &ObjectType,
    ) -> std::result::Result<Option<VaultObject>, RepoError> {
        Ok(self
            .fetch_where("object_type", object_type.root_type().label())
            .await?)
    }

    async fn get_by_local_path(
        &self,
        path: &Path,
    ) -> std::result::Result<Option<VaultObject>, RepoError> {
        Ok(self
            .fetch_where("local_path", path.to_string_lossy().into_owned())
            .await?)
    }

    async fn insert(&self, object: &VaultObject) -> std::result::Result<(), RepoError> {
        let mut tx = self.db.pool().begin().await.map_err(db_err)?;
        Self::check_root(&mut tx, object, None).await?;
        upsert(&mut tx, object).await?;
        tx.commit().await.map_err(db_err)?;
        self.publish().await;
        Ok(())
    }

    async fn update(&self, object: &VaultObject) -> std::result::Result<(), RepoError> {
        let mut tx = self.db.pool().begin().await.map_err(db_err)?;
        let known: Option<i64> = sqlx::query_scalar("SELECT 1 FROM objects WHERE meta_hash = ?")
            .bind(object.meta_hash.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        if known.is_none() {
            return Err(RepoError::NotFound(object.meta_hash));
        }
        Self::check_root(&mut tx, object, Some(&object.meta_hash)).await?;
        upsert(&mut tx, object).await?;
        tx.commit().await.map_err(db_err)?;
        self.publish().await;
        Ok(())
    }

    async fn replace(
        &self,
        old_meta_hash: &ObjectHash,
        new: &VaultObject,
    ) -> std::result::Result<(), RepoError> {
        let mut tx = self.db.pool().begin().await.map_err(db_err)?;
        if !remove(&mut tx, old_meta_hash).await? {
            return Err(RepoError::NotFound(*old_meta_hash));
        }
        Self::check_root(&mut tx, new, Some(old_meta_hash)).await?;
        upsert(&mut tx, new).await?;
        tx.commit().await.map_err(db_err)?;
        tracing::trace!(old = %old_meta_hash, new = %new.meta_hash, "replaced row");
        self.publish().await;
        Ok(())
    }

    async fn delete(&self, meta_hash: &ObjectHash) -> std::result::Result<bool, RepoError> {
        let mut tx = self.db.pool().begin().await.map_err(db_err)?;
        let existed = remove(&mut tx, meta_hash).await?;
        tx.commit().await.map_err(db_err)?;
        if existed {
            self.publish().await;
        }
        Ok(existed)
    }

    async fn list(&self) -> std::result::Result<Vec<VaultObject>, RepoError> {
        Ok(self.fetch_all().await?)
    }

    fn watch(&self) -> watch::Receiver<Vec<VaultObject>> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(seed: &str, object_type: ObjectType, children: Option<Vec<ChildRef>>) -> VaultObject {
        VaultObject {
            meta_hash: ObjectHash::digest(format!("meta-{}", seed).as_bytes()),
            content_hash: ObjectHash::digest(format!("content-{}", seed).as_bytes()),
            previous_version_hash: None,
            version: 1,
            object_type,
            name: seed.to_string(),
            timestamp: 1_700_000_000,
            decrypted_size: 3,
            sync_state: SyncState::Synced,
            local_path: Some(PathBuf::from(format!("files/{}", seed))),
            local_meta_path: Some(PathBuf::from(format!(".meta/files/{}.json", seed))),
            content_iv: Iv::from([1; 12]),
            meta_iv: Iv::from([2; 12]),
            objects: children,
        }
    }

    async fn repo() -> SqliteObjectRepository {
        SqliteObjectRepository::new(Database::in_memory().await.unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_row_survives_storage() {
        let repo = repo().await;
        let child = object("leaf", ObjectType::File, None);
        let mut dir = object("dir", ObjectType::File, Some(vec![child.child_ref()]));
        dir.previous_version_hash = Some(ObjectHash::digest(b"older"));
        dir.version = 4;
        repo.insert(&child).await.unwrap();
        repo.insert(&dir).await.unwrap();

        assert_eq!(repo.get(&dir.meta_hash).await.unwrap(), Some(dir.clone()));
        assert_eq!(
            repo.get_by_content_hash(&child.content_hash).await.unwrap(),
            Some(child.clone())
        );
        assert_eq!(
            repo.get_by_local_path(Path::new("files/dir")).await.unwrap(),
            Some(dir.clone())
        );
        assert_eq!(
            repo.get_parents(&child.meta_hash).await.unwrap(),
            vec![dir.clone()]
        );
        assert_eq!(repo.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_replace_moves_parent_index() {
        let repo = repo().await;
        let child = object("leaf", ObjectType::File, None);
        let old = object("v1", ObjectType::File, Some(vec![child.child_ref()]));
        let new = object("v2", ObjectType::File, Some(vec![child.child_ref()]));
        repo.insert(&child).await.unwrap();
        repo.insert(&old).await.unwrap();

        repo.replace(&old.meta_hash, &new).await.unwrap();
        assert!(repo.get(&old.meta_hash).await.unwrap().is_none());
        assert_eq!(
            repo.get_parents(&child.meta_hash).await.unwrap(),
            vec![new.clone()]
        );

        let missing = repo.replace(&old.meta_hash, &new).await;
        assert!(matches!(missing, Err(RepoError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_single_root_per_namespace() {
        let repo = repo().await;
        let root = object("root-a", ObjectType::File.root_type(), Some(vec![]));
        let other = object("root-b", ObjectType::File.root_type(), Some(vec![]));
        repo.insert(&root).await.unwrap();

        assert!(matches!(
            repo.insert(&other).await,
            Err(RepoError::DuplicateRoot(ObjectType::File))
        ));
        // swapping the sentinel for a new version is allowed
        repo.replace(&root.meta_hash, &other).await.unwrap();
        assert_eq!(
            repo.get_root(&ObjectType::File).await.unwrap(),
            Some(other)
        );
        // another namespace gets its own root
        let raw = object("root-raw", ObjectType::Raw.root_type(), Some(vec![]));
        repo.insert(&raw).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let repo = repo().await;
        let mut row = object("a", ObjectType::File, None);
        assert!(matches!(
            repo.update(&row).await,
            Err(RepoError::NotFound(_))
        ));

        repo.insert(&row).await.unwrap();
        row.sync_state = SyncState::UnsyncedOnlyRemote;
        row.local_path = None;
        row.local_meta_path = None;
        repo.update(&row).await.unwrap();
        assert_eq!(repo.get(&row.meta_hash).await.unwrap(), Some(row.clone()));

        assert!(repo.delete(&row.meta_hash).await.unwrap());
        assert!(!repo.delete(&row.meta_hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_watch_sees_writes() {
        let repo = repo().await;
        let mut feed = repo.watch();
        assert!(feed.borrow_and_update().is_empty());

        let row = object("a", ObjectType::File, None);
        repo.insert(&row).await.unwrap();
        assert!(feed.has_changed().unwrap());
        assert_eq!(*feed.borrow_and_update(), vec![row]);
    }
}
