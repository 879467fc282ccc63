use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::object::ObjectType;

/// One async mutex per type namespace.
///
/// Every lineage of type `T` ends at the `Root(T)` sentinel, so holding the
/// namespace lock serializes every read-modify-write of child lists that a
/// mutation could reach. Operations on different types run concurrently.
///
/// A tree may mix types (a raw object listed by a file directory), so an
/// operation can need several namespaces. [`LineageLocks::lock_all`] takes
/// them in `ObjectType` order, which every caller shares.
#[derive(Debug, Clone, Default)]
pub struct LineageLocks {
    locks: Arc<Mutex<HashMap<ObjectType, Arc<AsyncMutex<()>>>>>,
}

impl LineageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, object_type: &ObjectType) -> OwnedMutexGuard<()> {
        let namespace = object_type.namespace();
        let lock = self.locks.lock().entry(namespace).or_default().clone();
        lock.lock_owned().await
    }

    /// Lock the namespaces of all `types`, lowest first.
    pub async fn lock_all<'a>(
        &self,
        types: impl IntoIterator<Item = &'a ObjectType>,
    ) -> LineageGuard {
        let namespaces: BTreeSet<ObjectType> =
            types.into_iter().map(ObjectType::namespace).collect();
        let mut guards = Vec::with_capacity(namespaces.len());
        for namespace in &namespaces {
            guards.push(self.lock(namespace).await);
        }
        LineageGuard { guards }
    }
}

/// Namespace locks taken together; all released on drop.
#[derive(Debug)]
pub struct LineageGuard {
    guards: Vec<OwnedMutexGuard<()>>,
}

impl LineageGuard {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_namespace_serializes() {
        let locks = LineageLocks::new();
        let guard = locks.lock(&ObjectType::File).await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            let _g = contender.lock(&ObjectType::File.root_type()).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        // other namespaces are not blocked
        let _raw = locks.lock(&ObjectType::Raw).await;

        drop(guard);
        waiting.await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_all_dedupes_namespaces() {
        let locks = LineageLocks::new();
        let both = locks
            .lock_all(&[ObjectType::File, ObjectType::File.root_type(), ObjectType::Raw])
            .await;
        assert_eq!(both.len(), 2);

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            // opposite order to the holder above
            let _g = contender.lock_all(&[ObjectType::Raw, ObjectType::File]).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());
        let _meta = locks.lock(&ObjectType::Meta).await;

        drop(both);
        waiting.await.unwrap();
    }
}
