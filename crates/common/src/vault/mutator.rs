use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::builder::{CreateObjectError, CreateRequest, ObjectBuilder};
use super::cancel::{CancelToken, Cancelled};
use super::context::VaultContext;
use super::lifecycle::{self, Staged};
use crate::backend::BackendError;
use crate::crypto::EncryptionError;
use crate::hash::ObjectHash;
use crate::mirror::MirrorError;
use crate::object::{ChildRef, SyncState, VaultObject, META_DIR, ROOT_SENTINEL_NAME};
use crate::repository::RepoError;

#[derive(Debug, thiserror::Error)]
pub enum ManipulateObjectError {
    #[error("failed to build new version: {0}")]
    Create(#[from] CreateObjectError),
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),
    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),
    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("backend did not release pin on {0}")]
    Unpin(ObjectHash),
    #[error("refusing to drop {0}: the local copy is the only copy")]
    OnlyLocalCopy(ObjectHash),
    #[error("root sentinel {0} cannot be modified directly")]
    RootSentinel(ObjectHash),
    #[error("object {0} is not a directory")]
    NotADirectory(ObjectHash),
    #[error("invalid object name: {0:?}")]
    InvalidName(String),
    #[error("new version is in place but retiring {0} failed: {1}")]
    Retire(ObjectHash, #[source] Box<ManipulateObjectError>),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl ManipulateObjectError {
    /// Whether the edit itself went through and only cleanup of the
    /// superseded versions failed.
    pub fn is_committed(&self) -> bool {
        matches!(
            self,
            Self::Retire(..) | Self::Create(CreateObjectError::Retire(_))
        )
    }
}

/// One parent across a propagation run: the row it started as and every
/// version built for it so far, the last being current.
struct Rebuild {
    original: VaultObject,
    versions: Vec<ObjectHash>,
    current: usize,
}

/// Edits, deletes and bottom-up propagation.
///
/// Every edit is a new version built by [`ObjectBuilder`], followed by
/// relinking every ancestor that listed the old version, followed by
/// retiring the old version. Nothing is retired before every ancestor is
/// swapped, so a failed edit leaves the previous tree reachable.
#[derive(Debug, Clone)]
pub struct ObjectMutator {
    ctx: VaultContext,
    builder: ObjectBuilder,
}

impl ObjectMutator {
    pub fn new(ctx: VaultContext, builder: ObjectBuilder) -> Self {
        Self { ctx, builder }
    }

    /// Plaintext content of `object`, from the mirror when present locally.
    pub async fn load_content(&self, object: &VaultObject) -> Result<Vec<u8>, ManipulateObjectError> {
        if object.sync_state.is_local() {
            if let Some(path) = &object.local_path {
                return Ok(self.ctx.mirror.read(path).await?);
            }
        }
        let ciphertext = self.ctx.backend.download(&object.content_hash).await?;
        Ok(self
            .ctx
            .crypto
            .decrypt_blob(&object.content_hash, &object.content_iv, &ciphertext)
            .await?)
    }

    pub async fn update_content(
        &self,
        old: &VaultObject,
        data: impl Into<Bytes>,
        cancel: &CancelToken,
    ) -> Result<VaultObject, ManipulateObjectError> {
        ensure_mutable(old)?;
        let request = next_version(old)
            .at_path(old.local_path.clone())
            .children(old.objects.clone());
        let request = CreateRequest {
            data: data.into(),
            ..request
        };
        let staged = self.builder.create_staged(request, cancel).await?;
        let new = self.settle(old, staged, cancel).await?;

        tracing::info!(
            old = %old.meta_hash,
            new = %new.meta_hash,
            version = new.version,
            "updated content"
        );
        Ok(new)
    }

    pub async fn rename(
        &self,
        old: &VaultObject,
        new_name: &str,
        cancel: &CancelToken,
    ) -> Result<VaultObject, ManipulateObjectError> {
        ensure_mutable(old)?;
        validate_name(new_name)?;
        if new_name == old.name {
            return Ok(old.clone());
        }

        let data = self.load_content(old).await?;
        let new_path = old.local_path.as_ref().map(|p| p.with_file_name(new_name));
        let moved = match (&old.local_path, &new_path) {
            (Some(from), Some(to)) if old.is_directory() => {
                self.move_tree(old, from, to).await?;
                Some((from.as_path(), to.as_path()))
            }
            _ => None,
        };

        let request = CreateRequest {
            data: data.into(),
            name: new_name.to_string(),
            ..next_version(old)
        }
        .at_path(new_path.clone())
        .overwrite(old.is_directory())
        .children(old.objects.clone());
        let settled = match self.builder.create_staged(request, cancel).await {
            Ok(staged) => self.settle(old, staged, cancel).await,
            Err(e) => Err(e.into()),
        };
        let new = match settled {
            Ok(new) => new,
            Err(e) => {
                if let (Some((from, to)), false) = (moved, e.is_committed()) {
                    if let Err(back) = self.move_tree(old, to, from).await {
                        tracing::warn!(error = %back, "failed to move renamed tree back");
                    }
                }
                return Err(e);
            }
        };

        tracing::info!(
            old = %old.meta_hash,
            new = %new.meta_hash,
            from = %old.name,
            to = %new.name,
            "renamed object"
        );
        Ok(new)
    }

    /// Append `child` to the child list of `parent` as a new parent version.
    pub async fn add_child(
        &self,
        parent: &VaultObject,
        child: &VaultObject,
        cancel: &CancelToken,
    ) -> Result<VaultObject, ManipulateObjectError> {
        ensure_directory(parent)?;
        if parent.references(&child.meta_hash) {
            return Ok(parent.clone());
        }
        let mut children = parent.children().to_vec();
        children.push(child.child_ref());
        self.edit_children(parent, children, cancel).await
    }

    /// Drop `child_meta_hash` from the child list of `parent` as a new parent
    /// version.
    pub async fn remove_child(
        &self,
        parent: &VaultObject,
        child_meta_hash: &ObjectHash,
        cancel: &CancelToken,
    ) -> Result<VaultObject, ManipulateObjectError> {
        ensure_directory(parent)?;
        if !parent.references(child_meta_hash) {
            return Ok(parent.clone());
        }
        let children = relink(parent.children(), &[*child_meta_hash], None);
        self.edit_children(parent, children, cancel).await
    }

    /// Delete `object`.
    ///
    /// With `only_locally` the local bytes are dropped and the row is kept as
    /// remote-only; otherwise pins, keys, row and bytes all go. Either way the
    /// object is unlinked from every parent. Returns the surviving row of a
    /// local delete.
    pub async fn delete(
        &self,
        object: &VaultObject,
        only_locally: bool,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<Option<VaultObject>, ManipulateObjectError> {
        ensure_mutable(object)?;
        if only_locally {
            self.soft_delete(object, force, cancel).await.map(Some)
        } else {
            self.hard_delete(object, cancel).await.map(|()| None)
        }
    }

    /// Relink every ancestor of `old` to `new` (or just unlink it when `new`
    /// is `None`), rebuilding each ancestor bottom-up until no parent is
    /// left.
    ///
    /// Every rebuilt version is uploaded before any row changes. Only then
    /// are the ancestor rows swapped and the versions they replace retired.
    /// A failure before the swap discards everything built and restores the
    /// mirror, so the caller sees the tree it started with.
    pub async fn replace_for_all_parents(
        &self,
        old: &VaultObject,
        new: Option<&VaultObject>,
        cancel: &CancelToken,
    ) -> Result<(), ManipulateObjectError> {
        let mut built: Vec<Staged> = Vec::new();
        let mut rebuilds: Vec<Rebuild> = Vec::new();
        match self
            .rebuild_parents(old, new, cancel, &mut built, &mut rebuilds)
            .await
        {
            Ok(()) => self.commit_parents(&built, &rebuilds, cancel).await,
            Err(e) => {
                self.unwind_all(&built).await;
                Err(e)
            }
        }
    }

    async fn unwind_all(&self, built: &[Staged]) {
        for staged in built.iter().rev() {
            staged.unwind(&self.ctx).await;
        }
    }

    async fn rebuild_parents(
        &self,
        old: &VaultObject,
        new: Option<&VaultObject>,
        cancel: &CancelToken,
        built: &mut Vec<Staged>,
        rebuilds: &mut Vec<Rebuild>,
    ) -> Result<(), ManipulateObjectError> {
        let mut index: HashMap<ObjectHash, usize> = HashMap::new();
        let mut queue = VecDeque::from([old.meta_hash]);

        while let Some(stale) = queue.pop_front() {
            // every hash a parent may still list for `stale`, and what replaces it
            let (aliases, fresh) = match index.get(&stale) {
                Some(&i) => {
                    let rebuild = &rebuilds[i];
                    let mut aliases = vec![rebuild.original.meta_hash];
                    aliases.extend_from_slice(&rebuild.versions);
                    (aliases, Some(built[rebuild.current].object.child_ref()))
                }
                None => (vec![stale], new.map(VaultObject::child_ref)),
            };

            let parents = self.ctx.repo.get_parents(&stale).await?;
            if parents.is_empty() {
                tracing::trace!(meta_hash = %stale, "propagation reached a top-level object");
            }

            for parent in parents {
                cancel.check("rebuild parent")?;
                let slot = index.get(&parent.meta_hash).copied();
                let base = match slot {
                    Some(i) => &built[rebuilds[i].current].object,
                    None => &parent,
                };
                let children = relink(base.children(), &aliases, fresh);
                if children == base.children() {
                    continue;
                }

                let request = next_version(&parent)
                    .at_path(parent.local_path.clone())
                    .children(Some(children));
                let request = CreateRequest {
                    data: self.load_content(&parent).await?.into(),
                    ..request
                };
                let mut staged = self.builder.build_staged(request, cancel).await?;
                if parent.sync_state == SyncState::UnsyncedOnlyPartly
                    && staged.object.sync_state == SyncState::Synced
                {
                    staged.object.sync_state = SyncState::UnsyncedOnlyPartly;
                }
                tracing::debug!(
                    old = %parent.meta_hash,
                    new = %staged.object.meta_hash,
                    child = %stale,
                    "rebuilt parent"
                );

                let hash = staged.object.meta_hash;
                built.push(staged);
                let current = built.len() - 1;
                match slot {
                    Some(i) => {
                        rebuilds[i].versions.push(hash);
                        rebuilds[i].current = current;
                    }
                    None => {
                        index.insert(parent.meta_hash, rebuilds.len());
                        rebuilds.push(Rebuild {
                            original: parent.clone(),
                            versions: vec![hash],
                            current,
                        });
                    }
                }
                queue.push_back(parent.meta_hash);
            }
        }
        Ok(())
    }

    /// Swap every rebuilt ancestor row in, then retire what it replaced.
    async fn commit_parents(
        &self,
        built: &[Staged],
        rebuilds: &[Rebuild],
        cancel: &CancelToken,
    ) -> Result<(), ManipulateObjectError> {
        if let Err(e) = cancel.check("swap parents") {
            self.unwind_all(built).await;
            return Err(e.into());
        }

        for (swapped, rebuild) in rebuilds.iter().enumerate() {
            let current = &built[rebuild.current].object;
            if let Err(e) = self.ctx.repo.replace(&rebuild.original.meta_hash, current).await {
                for undo in rebuilds[..swapped].iter().rev() {
                    let put = &built[undo.current].object;
                    if let Err(back) = self.ctx.repo.replace(&put.meta_hash, &undo.original).await {
                        tracing::warn!(meta_hash = %undo.original.meta_hash, error = %back, "failed to swap parent back");
                    }
                }
                self.unwind_all(built).await;
                return Err(e.into());
            }
        }

        // versions built and then rebuilt again never had a row
        for (i, staged) in built.iter().enumerate() {
            if !rebuilds.iter().any(|r| r.current == i) {
                lifecycle::discard(&self.ctx, &staged.object).await;
            }
        }

        let mut first_failure = None;
        for rebuild in rebuilds {
            let current = &built[rebuild.current].object;
            if let Err(e) = lifecycle::retire(&self.ctx, &rebuild.original, Some(current)).await {
                tracing::warn!(meta_hash = %rebuild.original.meta_hash, error = %e, "failed to retire parent");
                first_failure.get_or_insert(ManipulateObjectError::Retire(
                    rebuild.original.meta_hash,
                    Box::new(e),
                ));
            }
            tracing::debug!(
                old = %rebuild.original.meta_hash,
                new = %current.meta_hash,
                "relinked parent"
            );
        }
        first_failure.map_or(Ok(()), Err)
    }

    async fn edit_children(
        &self,
        parent: &VaultObject,
        children: Vec<ChildRef>,
        cancel: &CancelToken,
    ) -> Result<VaultObject, ManipulateObjectError> {
        let request = CreateRequest {
            data: self.load_content(parent).await?.into(),
            ..next_version(parent)
        }
        .at_path(parent.local_path.clone())
        .children(Some(children));

        let staged = self.builder.create_staged(request, cancel).await?;
        let new = self.settle(parent, staged, cancel).await?;
        tracing::info!(
            old = %parent.meta_hash,
            new = %new.meta_hash,
            children = new.children().len(),
            "edited children"
        );
        Ok(new)
    }

    /// Link a freshly created successor of `old` into the tree, then retire
    /// `old`. Until every ancestor is swapped a failure unwinds the
    /// successor, leaving `old` current and its local bytes in place.
    async fn settle(
        &self,
        old: &VaultObject,
        staged: Staged,
        cancel: &CancelToken,
    ) -> Result<VaultObject, ManipulateObjectError> {
        let linked = match self.carry_partial(old, staged.object.clone()).await {
            Ok(new) => self
                .replace_for_all_parents(old, Some(&new), cancel)
                .await
                .map(|()| new),
            Err(e) => Err(e),
        };
        let new = match linked {
            Ok(new) => new,
            Err(e) if e.is_committed() => return Err(e),
            Err(e) => {
                staged.unwind(&self.ctx).await;
                return Err(e);
            }
        };

        lifecycle::retire(&self.ctx, old, Some(&new))
            .await
            .map_err(|e| ManipulateObjectError::Retire(old.meta_hash, Box::new(e)))?;
        Ok(new)
    }

    async fn soft_delete(
        &self,
        object: &VaultObject,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<VaultObject, ManipulateObjectError> {
        let mut subtree = vec![object.clone()];
        subtree.extend(lifecycle::collect_subtree(&self.ctx, object, false).await?);

        if !force {
            if let Some(only_copy) = subtree
                .iter()
                .find(|o| o.sync_state == SyncState::UnsyncedOnlyLocal)
            {
                return Err(ManipulateObjectError::OnlyLocalCopy(only_copy.meta_hash));
            }
        }

        let mut detached = object.clone();
        for node in subtree.iter().rev() {
            cancel.check("drop local bytes")?;
            lifecycle::remove_local(&self.ctx, node, None).await?;

            let mut remote = node.clone();
            remote.sync_state = if node.sync_state.is_remote() {
                SyncState::UnsyncedOnlyRemote
            } else {
                SyncState::None
            };
            remote.local_path = None;
            remote.local_meta_path = None;
            self.ctx.repo.update(&remote).await?;

            if remote.meta_hash == object.meta_hash {
                detached = remote;
            }
        }

        self.replace_for_all_parents(&detached, None, cancel).await?;
        tracing::info!(
            meta_hash = %detached.meta_hash,
            sync_state = %detached.sync_state,
            "deleted local copy"
        );
        Ok(detached)
    }

    async fn hard_delete(
        &self,
        object: &VaultObject,
        cancel: &CancelToken,
    ) -> Result<(), ManipulateObjectError> {
        if object.sync_state.is_remote() {
            lifecycle::unpin_pair(&self.ctx, object).await?;
        }

        let descendants = lifecycle::collect_subtree(&self.ctx, object, true).await?;
        for descendant in descendants.iter().rev() {
            lifecycle::purge(&self.ctx, descendant).await?;
        }

        self.ctx.crypto.delete_keys_for_object(object).await?;
        self.ctx.repo.delete(&object.meta_hash).await?;
        lifecycle::remove_local(&self.ctx, object, None).await?;
        self.replace_for_all_parents(object, None, cancel).await?;

        tracing::info!(
            meta_hash = %object.meta_hash,
            descendants = descendants.len(),
            "deleted object"
        );
        Ok(())
    }

    /// Move a local directory and its meta directory, then rewrite the
    /// local paths of every descendant row.
    async fn move_tree(
        &self,
        dir: &VaultObject,
        from: &Path,
        to: &Path,
    ) -> Result<(), ManipulateObjectError> {
        if self.ctx.mirror.exists(from).await? {
            self.ctx.mirror.rename(from, to).await?;
        }
        let meta_from = PathBuf::from(META_DIR).join(from);
        let meta_to = PathBuf::from(META_DIR).join(to);
        if self.ctx.mirror.exists(&meta_from).await? {
            self.ctx.mirror.rename(&meta_from, &meta_to).await?;
        }

        for descendant in lifecycle::collect_subtree(&self.ctx, dir, false).await? {
            let mut moved = descendant.clone();
            moved.local_path = descendant.local_path.as_deref().map(|p| rebase(p, from, to));
            moved.local_meta_path = descendant
                .local_meta_path
                .as_deref()
                .map(|p| rebase(p, &meta_from, &meta_to));
            if moved != descendant {
                self.ctx.repo.update(&moved).await?;
            }
        }
        Ok(())
    }

    /// A rebuilt directory that still misses children stays partly synced.
    async fn carry_partial(
        &self,
        old: &VaultObject,
        mut new: VaultObject,
    ) -> Result<VaultObject, ManipulateObjectError> {
        if old.sync_state == SyncState::UnsyncedOnlyPartly && new.sync_state == SyncState::Synced {
            new.sync_state = SyncState::UnsyncedOnlyPartly;
            self.ctx.repo.update(&new).await?;
        }
        Ok(new)
    }
}

/// A request for the version after `object`: same name, type and remote
/// policy, overwriting in place. Callers fill in data, path and children.
fn next_version(object: &VaultObject) -> CreateRequest {
    CreateRequest::new(object.name.clone(), object.object_type.clone(), Bytes::new())
        .overwrite(true)
        .previous_version(object)
        .only_locally(object.sync_state == SyncState::UnsyncedOnlyLocal)
}

/// Replace every reference to any hash in `old` with `new` in place, or drop
/// it.
fn relink(children: &[ChildRef], old: &[ObjectHash], new: Option<ChildRef>) -> Vec<ChildRef> {
    children
        .iter()
        .filter_map(|child| match (old.contains(&child.meta_hash), new) {
            (false, _) => Some(*child),
            (true, Some(replacement)) => Some(replacement),
            (true, None) => None,
        })
        .collect()
}

fn rebase(path: &Path, from: &Path, to: &Path) -> PathBuf {
    path.strip_prefix(from)
        .map(|rest| to.join(rest))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn ensure_mutable(object: &VaultObject) -> Result<(), ManipulateObjectError> {
    if object.is_root() {
        return Err(ManipulateObjectError::RootSentinel(object.meta_hash));
    }
    Ok(())
}

fn ensure_directory(object: &VaultObject) -> Result<(), ManipulateObjectError> {
    ensure_mutable(object)?;
    if !object.is_directory() {
        return Err(ManipulateObjectError::NotADirectory(object.meta_hash));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ManipulateObjectError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name == ROOT_SENTINEL_NAME
        || name.contains(['/', '\\']);
    if invalid {
        return Err(ManipulateObjectError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::Iv;

    fn child(seed: &[u8]) -> ChildRef {
        ChildRef::new(ObjectHash::digest(seed), Iv::from([0u8; 12]))
    }

    #[test]
    fn test_relink_keeps_position() {
        let (a, b, c, d) = (child(b"a"), child(b"b"), child(b"c"), child(b"d"));
        let list = vec![a, b, c];
        assert_eq!(relink(&list, &[b.meta_hash], Some(d)), vec![a, d, c]);
        assert_eq!(relink(&list, &[b.meta_hash], None), vec![a, c]);
        assert_eq!(relink(&list, &[d.meta_hash], None), list);
        // an earlier rebuild of `b` is matched too
        assert_eq!(relink(&[a, d], &[b.meta_hash, d.meta_hash], Some(c)), vec![a, c]);
    }

    #[test]
    fn test_rebase() {
        assert_eq!(
            rebase(Path::new("files/docs/a.txt"), Path::new("files/docs"), Path::new("files/notes")),
            PathBuf::from("files/notes/a.txt")
        );
        assert_eq!(
            rebase(Path::new("raw/x"), Path::new("files/docs"), Path::new("files/notes")),
            PathBuf::from("raw/x")
        );
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("b.txt").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", ROOT_SENTINEL_NAME] {
            assert!(validate_name(bad).is_err(), "{bad} accepted");
        }
    }
}
