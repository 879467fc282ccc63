//! Steps shared by every pipeline that ends an object version's life.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use super::context::VaultContext;
use super::mutator::ManipulateObjectError;
use crate::hash::ObjectHash;
use crate::mirror::MirrorError;
use crate::object::{meta_path_for, VaultObject};
use crate::repository::RepoError;

/// What a set of mirror paths held before a pipeline wrote over them.
#[derive(Debug, Default)]
pub(crate) struct LocalSnapshot {
    entries: Vec<(PathBuf, Option<Vec<u8>>)>,
}

impl LocalSnapshot {
    /// Record the content and meta paths an object at `local_path` writes.
    pub async fn capture(
        ctx: &VaultContext,
        local_path: Option<&Path>,
    ) -> Result<Self, MirrorError> {
        let mut entries = Vec::new();
        if let Some(path) = local_path {
            for path in [path.to_path_buf(), meta_path_for(path)] {
                let before = if ctx.mirror.exists(&path).await? {
                    Some(ctx.mirror.read(&path).await?)
                } else {
                    None
                };
                entries.push((path, before));
            }
        }
        Ok(Self { entries })
    }

    /// Put every path back the way it was: rewrite what existed, remove what
    /// did not. Failures are logged and skipped.
    pub async fn restore(&self, ctx: &VaultContext) {
        for (path, before) in self.entries.iter().rev() {
            let result = match before {
                Some(bytes) => ctx.mirror.write(path, bytes, true).await,
                None => ctx.mirror.remove(path).await,
            };
            if let Err(e) = result {
                tracing::warn!(path = %path.display(), error = %e, "failed to restore local bytes");
            }
        }
    }
}

/// A version built and uploaded but not yet part of the tree.
#[derive(Debug)]
pub(crate) struct Staged {
    pub object: VaultObject,
    pub snapshot: LocalSnapshot,
}

impl Staged {
    /// Throw the version away: its pins, keys and row go, and its local
    /// paths get their previous bytes back.
    pub async fn unwind(&self, ctx: &VaultContext) {
        discard(ctx, &self.object).await;
        self.snapshot.restore(ctx).await;
    }
}

/// Release the pin on a blob and erase its keys, logging failures.
pub(crate) async fn release_blob(ctx: &VaultContext, hash: &ObjectHash, pinned: bool) {
    if pinned {
        match ctx.backend.unpin(hash).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(%hash, "backend kept pin on discarded blob"),
            Err(e) => tracing::warn!(%hash, error = %e, "failed to unpin discarded blob"),
        }
    }
    if let Err(e) = ctx.crypto.delete_keys_for_hash(hash).await {
        tracing::warn!(%hash, error = %e, "failed to erase keys of discarded blob");
    }
}

/// Best-effort removal of a version that never became reachable: pins, keys
/// and row. Local bytes are left to the caller.
pub(crate) async fn discard(ctx: &VaultContext, object: &VaultObject) {
    let pinned = object.sync_state.is_remote();
    release_blob(ctx, &object.content_hash, pinned).await;
    release_blob(ctx, &object.meta_hash, pinned).await;
    if let Err(e) = ctx.repo.delete(&object.meta_hash).await {
        tracing::warn!(meta_hash = %object.meta_hash, error = %e, "failed to drop discarded row");
    }
    tracing::debug!(meta_hash = %object.meta_hash, "discarded unreachable version");
}

/// Pin `hash` on the backend. Both a refusal and a transport failure are
/// reported as [`RepoError::Pinning`].
pub(crate) async fn pin(ctx: &VaultContext, hash: &ObjectHash, label: &str) -> Result<(), RepoError> {
    match ctx.backend.pin(hash, label).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(RepoError::Pinning(format!("backend refused to pin {}", hash))),
        Err(e) => Err(RepoError::Pinning(e.to_string())),
    }
}

/// Release the content and meta pins of `object`. Both calls are always
/// issued; the first failure is returned.
pub(crate) async fn unpin_pair(
    ctx: &VaultContext,
    object: &VaultObject,
) -> Result<(), ManipulateObjectError> {
    let content = ctx.backend.unpin(&object.content_hash).await;
    let meta = ctx.backend.unpin(&object.meta_hash).await;
    for (hash, result) in [(object.content_hash, content), (object.meta_hash, meta)] {
        match result {
            Ok(true) => {}
            Ok(false) => return Err(ManipulateObjectError::Unpin(hash)),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Remove the local bytes of `object`, except at paths `successor` reuses.
pub(crate) async fn remove_local(
    ctx: &VaultContext,
    object: &VaultObject,
    successor: Option<&VaultObject>,
) -> Result<(), ManipulateObjectError> {
    let reused = |path: &Path| {
        successor.is_some_and(|s| {
            s.local_path.as_deref() == Some(path) || s.local_meta_path.as_deref() == Some(path)
        })
    };
    for path in [object.local_path.as_deref(), object.local_meta_path.as_deref()]
        .into_iter()
        .flatten()
    {
        if !reused(path) {
            ctx.mirror.remove(path).await?;
        }
    }
    Ok(())
}

/// Retire a superseded version: release its pins if it was ever remote,
/// erase its keys, drop its row, and remove local bytes the successor does
/// not reuse.
pub(crate) async fn retire(
    ctx: &VaultContext,
    old: &VaultObject,
    successor: Option<&VaultObject>,
) -> Result<(), ManipulateObjectError> {
    if old.sync_state.is_remote() {
        unpin_pair(ctx, old).await?;
    }
    ctx.crypto.delete_keys_for_object(old).await?;
    ctx.repo.delete(&old.meta_hash).await?;
    remove_local(ctx, old, successor).await?;
    tracing::debug!(
        meta_hash = %old.meta_hash,
        version = old.version,
        successor = ?successor.map(|s| s.meta_hash),
        "retired version"
    );
    Ok(())
}

/// Hard-delete a single row with no unlinking: pins, keys, row, bytes.
pub(crate) async fn purge(ctx: &VaultContext, object: &VaultObject) -> Result<(), ManipulateObjectError> {
    if object.sync_state.is_remote() {
        unpin_pair(ctx, object).await?;
    }
    ctx.crypto.delete_keys_for_object(object).await?;
    ctx.repo.delete(&object.meta_hash).await?;
    remove_local(ctx, object, None).await
}

/// Known descendants of `root` in breadth-first order, `root` excluded.
///
/// With `exclusive`, a descendant that is also listed by a parent outside
/// the collected subtree is skipped together with everything below it.
pub(crate) async fn collect_subtree(
    ctx: &VaultContext,
    root: &VaultObject,
    exclusive: bool,
) -> Result<Vec<VaultObject>, RepoError> {
    let mut seen: HashSet<ObjectHash> = HashSet::from([root.meta_hash]);
    let mut queue: VecDeque<VaultObject> = VecDeque::from([root.clone()]);
    let mut found = Vec::new();

    while let Some(node) = queue.pop_front() {
        for child in node.children() {
            if seen.contains(&child.meta_hash) {
                continue;
            }
            let Some(row) = ctx.repo.get(&child.meta_hash).await? else {
                continue;
            };
            if exclusive {
                let parents = ctx.repo.get_parents(&row.meta_hash).await?;
                if parents.iter().any(|p| !seen.contains(&p.meta_hash)) {
                    tracing::debug!(meta_hash = %row.meta_hash, "keeping shared descendant");
                    continue;
                }
            }
            seen.insert(row.meta_hash);
            queue.push_back(row.clone());
            found.push(row);
        }
    }
    Ok(found)
}
