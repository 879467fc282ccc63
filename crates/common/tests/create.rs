//! Integration tests for the create pipeline

mod common;

use ::common::crypto::KeyNaming;
use ::common::mirror::MirrorError;
use ::common::object::{meta_path_for, MetaRecord, ObjectType, SyncState};
use ::common::repository::ObjectRepository;
use ::common::testkit::TestVault;
use ::common::vault::{CancelToken, CreateObjectError, CreateRequest, VaultError};

#[tokio::test]
async fn test_create_file_scenario() {
    let tv = common::setup_test_env().await;
    let object = tv.create_file("files/a.txt", b"hi").await.unwrap();

    assert_eq!(object.name, "a.txt");
    assert_eq!(object.version, 1);
    assert!(object.previous_version_hash.is_none());
    assert_eq!(object.sync_state, SyncState::Synced);
    assert_ne!(object.content_hash, object.meta_hash);
    assert_eq!(object.decrypted_size, 2);

    // both hashes are well formed and actually held by the backend
    let reparsed = ::common::hash::ObjectHash::parse(&object.meta_hash.to_string()).unwrap();
    assert_eq!(reparsed, object.meta_hash);
    assert!(tv.backend.inner().contains(&object.content_hash));
    assert!(tv.backend.inner().contains(&object.meta_hash));
    assert_eq!(
        tv.backend.inner().pin_label(&object.meta_hash).as_deref(),
        Some("a.txt")
    );

    assert_eq!(std::fs::read(tv.mirror_path("files/a.txt")).unwrap(), b"hi");
    assert_eq!(tv.vault.read(&object.meta_hash).await.unwrap(), b"hi");
}

#[tokio::test]
async fn test_meta_file_matches_row() {
    let tv = common::setup_test_env().await;
    let object = tv.create_file("files/a.txt", b"hi").await.unwrap();

    let meta_path = object.local_meta_path.clone().unwrap();
    assert_eq!(meta_path, meta_path_for(std::path::Path::new("files/a.txt")));
    let on_disk = std::fs::read(tv.mirror_path(&meta_path)).unwrap();
    assert_eq!(MetaRecord::decode(&on_disk).unwrap(), object.meta_record());
}

#[tokio::test]
async fn test_existing_file_is_not_overwritten() {
    let tv = common::setup_test_env().await;
    tv.create_file("files/a.txt", b"first").await.unwrap();
    let before = tv.repo.len();

    let result = tv.create_file("files/a.txt", b"second").await;
    let err = result.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<VaultError>(),
        Some(VaultError::Create(CreateObjectError::Mirror(MirrorError::Exists(_))))
    ));
    assert_eq!(tv.repo.len(), before);
    assert_eq!(std::fs::read(tv.mirror_path("files/a.txt")).unwrap(), b"first");
}

#[tokio::test]
async fn test_root_singleton_per_type() {
    let tv = TestVault::new().await.unwrap();
    tv.mkdir("files").await.unwrap();
    tv.create_file("files/a.txt", b"a").await.unwrap();
    tv.create_file("files/b.txt", b"b").await.unwrap();

    let raw = CreateRequest::new("blob", ObjectType::Raw, b"raw".to_vec()).at("raw/blob");
    tv.vault.create(raw, &CancelToken::never()).await.unwrap();

    let all = tv.vault.list().await.unwrap();
    let file_roots = all
        .iter()
        .filter(|o| o.object_type == ObjectType::File.root_type())
        .count();
    let raw_roots = all
        .iter()
        .filter(|o| o.object_type == ObjectType::Raw.root_type())
        .count();
    assert_eq!(file_roots, 1);
    assert_eq!(raw_roots, 1);
}

#[tokio::test]
async fn test_root_path_object_is_the_sentinel_child() {
    let tv = common::setup_test_env().await;
    let files = tv.at("files").await.unwrap();
    let root = tv.vault.root(&ObjectType::File).await.unwrap().unwrap();

    assert_eq!(root.children(), [files.child_ref()]);
    assert_eq!(root.name, ::common::object::ROOT_SENTINEL_NAME);

    // adding a file rebuilds `files`, and the sentinel follows it
    tv.create_file("files/a.txt", b"a").await.unwrap();
    let files = tv.at("files").await.unwrap();
    let root = tv.vault.root(&ObjectType::File).await.unwrap().unwrap();
    assert_eq!(root.children(), [files.child_ref()]);
    assert_eq!(files.children().len(), 1);
}

#[tokio::test]
async fn test_only_locally_uploads_nothing() {
    let tv = common::setup_test_env().await;
    tv.backend.reset_calls();

    let request = CreateRequest::new("solo.bin", ObjectType::Raw, b"local".to_vec())
        .at("raw/solo.bin")
        .only_locally(true);
    let object = tv.vault.create(request, &CancelToken::never()).await.unwrap();

    assert_eq!(object.sync_state, SyncState::UnsyncedOnlyLocal);
    let calls = tv.backend.calls();
    assert_eq!(calls.network_calls(), 0);
    assert!(calls.hash_only_uploads.contains(&object.content_hash));
    assert!(calls.hash_only_uploads.contains(&object.meta_hash));
    assert!(!tv.backend.inner().contains(&object.content_hash));
}

#[tokio::test]
async fn test_object_without_local_path_is_remote_only() {
    let tv = common::setup_test_env().await;
    let request = CreateRequest::new("cloud.txt", ObjectType::File, b"up".to_vec());
    let object = tv.vault.create(request, &CancelToken::never()).await.unwrap();
    assert_eq!(object.sync_state, SyncState::UnsyncedOnlyRemote);
    assert!(object.local_path.is_none());
    assert!(object.local_meta_path.is_none());
}

#[tokio::test]
async fn test_failed_upload_writes_no_row() {
    let tv = common::setup_test_env().await;
    let before = tv.repo.list().await.unwrap();
    let (keys, bundles) = (tv.keys.len(), tv.bundles.len());
    tv.backend.fail_uploads(true);

    let result = tv.create_file("files/a.txt", b"hi").await;
    assert!(result.is_err());
    assert_eq!(tv.repo.list().await.unwrap(), before);
    assert!(!tv.mirror_path("files/a.txt").exists());
    assert!(!tv.mirror_path(".meta/files/a.txt.json").exists());
    assert_eq!((tv.keys.len(), tv.bundles.len()), (keys, bundles));

    // the same create goes through once the backend recovers
    tv.backend.fail_uploads(false);
    let object = tv.create_file("files/a.txt", b"hi").await.unwrap();
    assert_eq!(std::fs::read(tv.mirror_path("files/a.txt")).unwrap(), b"hi");
    assert!(tv.at("files").await.unwrap().references(&object.meta_hash));
}

#[tokio::test]
async fn test_failed_meta_upload_releases_content() {
    let tv = common::setup_test_env().await;
    let pins = tv.backend.inner().pin_count();
    let (keys, bundles) = (tv.keys.len(), tv.bundles.len());
    tv.backend.fail_uploads_after(1);

    assert!(tv.create_file("files/a.txt", b"hi").await.is_err());
    assert_eq!(tv.backend.inner().pin_count(), pins);
    assert_eq!((tv.keys.len(), tv.bundles.len()), (keys, bundles));
    assert!(!tv.mirror_path("files/a.txt").exists());
    assert!(!tv.mirror_path(".meta/files/a.txt.json").exists());
}

#[tokio::test]
async fn test_failed_existing_path_create_keeps_bytes() {
    let tv = common::setup_test_env().await;
    tv.create_file("files/a.txt", b"first").await.unwrap();
    tv.backend.fail_uploads(true);

    let request = CreateRequest::new("a.txt", ObjectType::File, b"second".to_vec())
        .at("files/a.txt")
        .overwrite(true);
    assert!(tv.vault.create(request, &CancelToken::never()).await.is_err());
    assert_eq!(std::fs::read(tv.mirror_path("files/a.txt")).unwrap(), b"first");
    assert!(tv.mirror_path(".meta/files/a.txt.json").exists());
}

#[tokio::test]
async fn test_refused_pin_is_a_pinning_error() {
    let tv = common::setup_test_env().await;
    let (keys, bundles) = (tv.keys.len(), tv.bundles.len());
    tv.backend.refuse_pins(true);
    let request = CreateRequest::new("a.txt", ObjectType::File, b"hi".to_vec()).at("files/a.txt");
    let result = tv.vault.create(request, &CancelToken::never()).await;
    assert!(matches!(
        result,
        Err(VaultError::Create(CreateObjectError::Repo(
            ::common::repository::RepoError::Pinning(_)
        )))
    ));
    // the sealed blob never got a hash, so its bundle and key went with it
    assert_eq!((tv.keys.len(), tv.bundles.len()), (keys, bundles));
}

#[tokio::test]
async fn test_cancelled_create_writes_nothing() {
    let tv = TestVault::new().await.unwrap();
    let (handle, token) = CancelToken::pair();
    handle.cancel();

    let request = CreateRequest::new("a.txt", ObjectType::File, b"hi".to_vec()).at("files/a.txt");
    let result = tv.vault.create(request, &token).await;
    assert!(matches!(
        result,
        Err(VaultError::Create(CreateObjectError::Cancelled(_)))
    ));
    assert!(tv.repo.is_empty());
    assert_eq!(tv.backend.calls().network_calls(), 0);
}

#[tokio::test]
async fn test_nested_create_links_into_directory() {
    let (tv, _, leaf) = common::setup_chain().await;
    let docs = tv.at("files/docs").await.unwrap();
    assert!(docs.references(&leaf.meta_hash));
    let files = tv.at("files").await.unwrap();
    assert!(files.references(&docs.meta_hash));
}

#[tokio::test]
async fn test_content_derived_key_names() {
    let tv = TestVault::with_naming(KeyNaming::ContentDerived).await.unwrap();
    tv.mkdir("files").await.unwrap();
    let a = tv.create_file("files/a.txt", b"same").await.unwrap();
    let b = tv.create_file("files/b.txt", b"same").await.unwrap();
    assert_ne!(a.content_hash, b.content_hash);

    let crypto = &tv.vault.context().crypto;
    assert_eq!(
        crypto.lookup_key_name_by_hash(&a.content_hash).await.unwrap(),
        crypto.lookup_key_name_by_hash(&b.content_hash).await.unwrap()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_in_one_directory() {
    let tv = common::setup_test_env().await;
    let mut tasks = Vec::new();
    for i in 0..6 {
        let vault = tv.vault.clone();
        tasks.push(tokio::spawn(async move {
            let path = format!("files/f{}.txt", i);
            let request = CreateRequest::new(format!("f{}.txt", i), ObjectType::File, vec![i as u8; 4])
                .at(path);
            vault.create(request, &CancelToken::never()).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let files = tv.at("files").await.unwrap();
    assert_eq!(files.children().len(), 6);
    let roots = tv
        .vault
        .list()
        .await
        .unwrap()
        .into_iter()
        .filter(|o| o.is_root())
        .count();
    assert_eq!(roots, 1);
}

#[tokio::test]
async fn test_creates_from_two_namespaces_into_one_directory() {
    let tv = common::setup_test_env().await;
    tv.mkdir("files/docs").await.unwrap();
    let cancel = CancelToken::never();
    let raw = CreateRequest::new("blob.bin", ObjectType::Raw, b"raw".to_vec())
        .at("files/docs/blob.bin");

    let (raw, file) = tokio::join!(
        tv.vault.create(raw, &cancel),
        tv.create_file("files/docs/b.txt", b"b"),
    );
    let (raw, file) = (raw.unwrap(), file.unwrap());

    let docs = tv.at("files/docs").await.unwrap();
    assert!(docs.references(&raw.meta_hash));
    assert!(docs.references(&file.meta_hash));
    assert!(tv.at("files").await.unwrap().references(&docs.meta_hash));
}
