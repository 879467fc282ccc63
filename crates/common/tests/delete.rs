//! Integration tests for local and hard deletes

mod common;

use ::common::object::{ObjectType, SyncState};
use ::common::repository::ObjectRepository;
use ::common::vault::{CancelToken, ManipulateObjectError, VaultError};

#[tokio::test]
async fn test_hard_delete_unpins_both_halves_once() {
    let tv = common::setup_test_env().await;
    let object = tv.create_file("files/a.txt", b"hi").await.unwrap();
    tv.backend.reset_calls();

    let survivor = tv
        .vault
        .delete(&object.meta_hash, false, false, &CancelToken::never())
        .await
        .unwrap();
    assert!(survivor.is_none());

    let calls = tv.backend.calls();
    assert_eq!(calls.unpins_of(&object.content_hash), 1);
    assert_eq!(calls.unpins_of(&object.meta_hash), 1);

    assert!(tv.current(&object.meta_hash).await.unwrap().is_none());
    assert!(!tv.mirror_path("files/a.txt").exists());
    assert!(!tv.mirror_path(".meta/files/a.txt.json").exists());
    assert!(tv
        .vault
        .context()
        .crypto
        .lookup_key_by_hash(&object.meta_hash)
        .await
        .is_err());
    assert!(!tv.at("files").await.unwrap().references(&object.meta_hash));
}

#[tokio::test]
async fn test_hard_delete_keeps_row_when_unpin_fails() {
    let tv = common::setup_test_env().await;
    let object = tv.create_file("files/a.txt", b"hi").await.unwrap();
    tv.backend.refuse_unpin(object.meta_hash);
    tv.backend.reset_calls();

    let result = tv
        .vault
        .delete(&object.meta_hash, false, false, &CancelToken::never())
        .await;
    assert!(matches!(
        result,
        Err(VaultError::Manipulate(ManipulateObjectError::Unpin(hash))) if hash == object.meta_hash
    ));

    // both unpins were still issued, nothing else happened
    let calls = tv.backend.calls();
    assert_eq!(calls.unpins_of(&object.content_hash), 1);
    assert_eq!(calls.unpins_of(&object.meta_hash), 1);
    assert_eq!(tv.current(&object.meta_hash).await.unwrap(), Some(object.clone()));
    assert!(tv.at("files").await.unwrap().references(&object.meta_hash));
}

#[tokio::test]
async fn test_hard_delete_retry_after_refused_unpin() {
    let tv = common::setup_test_env().await;
    let object = tv.create_file("files/a.txt", b"hi").await.unwrap();
    tv.backend.refuse_unpin(object.meta_hash);
    assert!(tv
        .vault
        .delete(&object.meta_hash, false, false, &CancelToken::never())
        .await
        .is_err());
    // the content half went on the first attempt
    assert!(!tv.backend.inner().contains(&object.content_hash));

    tv.backend.allow_unpin(&object.meta_hash);
    tv.vault
        .delete(&object.meta_hash, false, false, &CancelToken::never())
        .await
        .unwrap();

    assert!(tv.current(&object.meta_hash).await.unwrap().is_none());
    assert!(!tv.backend.inner().contains(&object.meta_hash));
    assert!(!tv.at("files").await.unwrap().references(&object.meta_hash));
}

#[tokio::test]
async fn test_hard_delete_of_local_only_object_skips_backend() {
    let tv = common::setup_test_env().await;
    let object = tv.create_local_file("files/l.txt", b"local").await.unwrap();
    tv.backend.reset_calls();

    tv.vault
        .delete(&object.meta_hash, false, false, &CancelToken::never())
        .await
        .unwrap();
    let calls = tv.backend.calls();
    assert_eq!(calls.unpins_of(&object.content_hash), 0);
    assert_eq!(calls.unpins_of(&object.meta_hash), 0);
    assert!(tv.current(&object.meta_hash).await.unwrap().is_none());
}

#[tokio::test]
async fn test_hard_delete_directory_purges_subtree() {
    let (tv, _, leaf) = common::setup_chain().await;
    let docs = tv.at("files/docs").await.unwrap();

    tv.vault
        .delete(&docs.meta_hash, false, false, &CancelToken::never())
        .await
        .unwrap();

    assert!(tv.current(&docs.meta_hash).await.unwrap().is_none());
    assert!(tv.current(&leaf.meta_hash).await.unwrap().is_none());
    assert!(!tv.mirror_path("files/docs").exists());
    assert!(!tv.backend.inner().contains(&leaf.content_hash));
    assert!(tv.at("files").await.unwrap().children().is_empty());
}

#[tokio::test]
async fn test_local_delete_rejects_only_copy() {
    let tv = common::setup_test_env().await;
    let object = tv.create_local_file("files/l.txt", b"local").await.unwrap();

    let result = tv
        .vault
        .delete(&object.meta_hash, true, false, &CancelToken::never())
        .await;
    assert!(matches!(
        result,
        Err(VaultError::Manipulate(ManipulateObjectError::OnlyLocalCopy(_)))
    ));
    assert_eq!(tv.current(&object.meta_hash).await.unwrap(), Some(object.clone()));
    assert_eq!(std::fs::read(tv.mirror_path("files/l.txt")).unwrap(), b"local");
    assert!(tv.at("files").await.unwrap().references(&object.meta_hash));
}

#[tokio::test]
async fn test_forced_local_delete_of_only_copy() {
    let tv = common::setup_test_env().await;
    let object = tv.create_local_file("files/l.txt", b"local").await.unwrap();

    let survivor = tv
        .vault
        .delete(&object.meta_hash, true, true, &CancelToken::never())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(survivor.sync_state, SyncState::None);
    assert!(survivor.local_path.is_none());
    assert!(!tv.mirror_path("files/l.txt").exists());
    assert!(!tv.at("files").await.unwrap().references(&object.meta_hash));
}

#[tokio::test]
async fn test_local_delete_keeps_remote_copy() {
    let tv = common::setup_test_env().await;
    let object = tv.create_file("files/a.txt", b"hi").await.unwrap();
    tv.backend.reset_calls();

    let survivor = tv
        .vault
        .delete(&object.meta_hash, true, false, &CancelToken::never())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(survivor.meta_hash, object.meta_hash);
    assert_eq!(survivor.sync_state, SyncState::UnsyncedOnlyRemote);
    assert!(survivor.local_path.is_none() && survivor.local_meta_path.is_none());
    assert!(!tv.mirror_path("files/a.txt").exists());

    // the object's own blobs stay pinned, and it is detached from `files`
    assert_eq!(tv.backend.calls().unpins_of(&object.content_hash), 0);
    assert!(tv.backend.inner().contains(&object.content_hash));
    assert!(!tv.at("files").await.unwrap().references(&object.meta_hash));
    assert_eq!(tv.vault.read(&object.meta_hash).await.unwrap(), b"hi");
}

#[tokio::test]
async fn test_local_delete_of_directory_is_blocked_by_local_only_child() {
    let tv = common::setup_test_env().await;
    let docs = tv.mkdir("files/docs").await.unwrap();
    let local = tv.create_local_file("files/docs/l.txt", b"l").await.unwrap();
    let docs = tv.at("files/docs").await.unwrap_or(docs);

    let result = tv
        .vault
        .delete(&docs.meta_hash, true, false, &CancelToken::never())
        .await;
    assert!(matches!(
        result,
        Err(VaultError::Manipulate(ManipulateObjectError::OnlyLocalCopy(hash))) if hash == local.meta_hash
    ));
    assert!(tv.mirror_path("files/docs/l.txt").exists());
}

#[tokio::test]
async fn test_local_delete_of_directory_marks_subtree_remote() {
    let (tv, _, leaf) = common::setup_chain().await;
    let docs = tv.at("files/docs").await.unwrap();

    tv.vault
        .delete(&docs.meta_hash, true, false, &CancelToken::never())
        .await
        .unwrap();

    let leaf = tv.current(&leaf.meta_hash).await.unwrap().unwrap();
    assert_eq!(leaf.sync_state, SyncState::UnsyncedOnlyRemote);
    assert!(leaf.local_path.is_none());
    assert!(!tv.mirror_path("files/docs").exists());
    assert!(tv.at("files").await.unwrap().children().is_empty());
}

#[tokio::test]
async fn test_deleting_root_path_object_empties_the_sentinel() {
    let tv = common::setup_test_env().await;
    let files = tv.at("files").await.unwrap();
    tv.vault
        .delete(&files.meta_hash, false, false, &CancelToken::never())
        .await
        .unwrap();

    let root = tv.vault.root(&ObjectType::File).await.unwrap().unwrap();
    assert!(root.children().is_empty());
    assert_eq!(tv.repo.list().await.unwrap().len(), 1);
}
