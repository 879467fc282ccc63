use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;

use super::{ObjectRepository, RepoError};
use crate::hash::ObjectHash;
use crate::object::{ObjectType, VaultObject};

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<ObjectHash, VaultObject>,
    /// child meta hash -> parents listing it
    parents: HashMap<ObjectHash, HashSet<ObjectHash>>,
    /// namespace type -> meta hash of its root sentinel
    roots: HashMap<ObjectType, ObjectHash>,
}

impl Inner {
    fn index(&mut self, object: &VaultObject) {
        for child in object.children() {
            self.parents
                .entry(child.meta_hash)
                .or_default()
                .insert(object.meta_hash);
        }
        if object.is_root() {
            self.roots
                .insert(object.object_type.namespace(), object.meta_hash);
        }
    }

    fn unindex(&mut self, object: &VaultObject) {
        for child in object.children() {
            if let Some(set) = self.parents.get_mut(&child.meta_hash) {
                set.remove(&object.meta_hash);
                if set.is_empty() {
                    self.parents.remove(&child.meta_hash);
                }
            }
        }
        if object.is_root() {
            let namespace = object.object_type.namespace();
            if self.roots.get(&namespace) == Some(&object.meta_hash) {
                self.roots.remove(&namespace);
            }
        }
    }

    fn check_root(&self, object: &VaultObject, replacing: Option<&ObjectHash>) -> Result<(), RepoError> {
        if !object.is_root() {
            return Ok(());
        }
        match self.roots.get(&object.object_type.namespace()) {
            Some(existing) if Some(existing) != replacing && existing != &object.meta_hash => {
                Err(RepoError::DuplicateRoot(object.object_type.namespace()))
            }
            _ => Ok(()),
        }
    }

    fn listing(&self) -> Vec<VaultObject> {
        let mut all: Vec<VaultObject> = self.objects.values().cloned().collect();
        all.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.meta_hash.cmp(&b.meta_hash))
        });
        all
    }
}

/// Arena of object rows with a reverse child index and a root index.
#[derive(Debug, Clone)]
pub struct MemoryObjectRepository {
    inner: Arc<RwLock<Inner>>,
    feed: Arc<watch::Sender<Vec<VaultObject>>>,
}

impl Default for MemoryObjectRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectRepository {
    pub fn new() -> Self {
        let (feed, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            feed: Arc::new(feed),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().objects.is_empty()
    }

    fn publish(&self, inner: &Inner) {
        self.feed.send_replace(inner.listing());
    }
}

#[async_trait]
impl ObjectRepository for MemoryObjectRepository {
    async fn get(&self, meta_hash: &ObjectHash) -> Result<Option<VaultObject>, RepoError> {
        Ok(self.inner.read().objects.get(meta_hash).cloned())
    }

    async fn get_by_content_hash(
        &self,
        content_hash: &ObjectHash,
    ) -> Result<Option<VaultObject>, RepoError> {
        Ok(self
            .inner
            .read()
            .objects
            .values()
            .find(|o| &o.content_hash == content_hash)
            .cloned())
    }

    async fn get_parents(
        &self,
        child_meta_hash: &ObjectHash,
    ) -> Result<Vec<VaultObject>, RepoError> {
        let inner = self.inner.read();
        let mut parents: Vec<VaultObject> = inner
            .parents
            .get(child_meta_hash)
            .into_iter()
            .flatten()
            .filter_map(|hash| inner.objects.get(hash).cloned())
            .collect();
        parents.sort_by_key(|p| p.meta_hash);
        Ok(parents)
    }

    async fn get_root(&self, object_type: &ObjectType) -> Result<Option<VaultObject>, RepoError> {
        let inner = self.inner.read();
        Ok(inner
            .roots
            .get(&object_type.namespace())
            .and_then(|hash| inner.objects.get(hash))
            .cloned())
    }

    async fn get_by_local_path(&self, path: &Path) -> Result<Option<VaultObject>, RepoError> {
        Ok(self
            .inner
            .read()
            .objects
            .values()
            .find(|o| o.local_path.as_deref() == Some(path))
            .cloned())
    }

    async fn insert(&self, object: &VaultObject) -> Result<(), RepoError> {
        let mut inner = self.inner.write();
        inner.check_root(object, None)?;
        if let Some(previous) = inner.objects.insert(object.meta_hash, object.clone()) {
            inner.unindex(&previous);
        }
        inner.index(object);
        self.publish(&inner);
        Ok(())
    }

    async fn update(&self, object: &VaultObject) -> Result<(), RepoError> {
        let mut inner = self.inner.write();
        let previous = inner
            .objects
            .get(&object.meta_hash)
            .cloned()
            .ok_or(RepoError::NotFound(object.meta_hash))?;
        inner.check_root(object, Some(&previous.meta_hash))?;
        inner.unindex(&previous);
        inner.objects.insert(object.meta_hash, object.clone());
        inner.index(object);
        self.publish(&inner);
        Ok(())
    }

    async fn replace(
        &self,
        old_meta_hash: &ObjectHash,
        new: &VaultObject,
    ) -> Result<(), RepoError> {
        let mut inner = self.inner.write();
        let old = inner
            .objects
            .get(old_meta_hash)
            .cloned()
            .ok_or(RepoError::NotFound(*old_meta_hash))?;
        inner.check_root(new, Some(old_meta_hash))?;
        inner.objects.remove(old_meta_hash);
        inner.unindex(&old);
        if let Some(previous) = inner.objects.insert(new.meta_hash, new.clone()) {
            inner.unindex(&previous);
        }
        inner.index(new);
        self.publish(&inner);
        Ok(())
    }

    async fn delete(&self, meta_hash: &ObjectHash) -> Result<bool, RepoError> {
        let mut inner = self.inner.write();
        let Some(old) = inner.objects.remove(meta_hash) else {
            return Ok(false);
        };
        inner.unindex(&old);
        self.publish(&inner);
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<VaultObject>, RepoError> {
        Ok(self.inner.read().listing())
    }

    fn watch(&self) -> watch::Receiver<Vec<VaultObject>> {
        self.feed.subscribe()
    }
}
