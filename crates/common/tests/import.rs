//! Integration tests for importing objects by meta hash and nonce

mod common;

use ::common::crypto::{EncryptionError, Iv};
use ::common::hash::ObjectHash;
use ::common::object::SyncState;
use ::common::repository::ObjectRepository;
use ::common::vault::{ImportObjectError, VaultError};

#[tokio::test]
async fn test_import_restores_forgotten_row() {
    let tv = common::setup_test_env().await;
    let object = tv.create_file("files/a.txt", b"hi").await.unwrap();
    tv.repo.delete(&object.meta_hash).await.unwrap();

    let imported = tv
        .vault
        .import(&object.meta_hash, &object.meta_iv, false)
        .await
        .unwrap();
    assert_eq!(imported.meta_hash, object.meta_hash);
    assert_eq!(imported.content_hash, object.content_hash);
    assert_eq!(imported.content_iv, object.content_iv);
    assert_eq!(imported.name, "a.txt");
    assert_eq!(imported.version, object.version);
    assert_eq!(imported.decrypted_size, 2);
    assert_eq!(imported.sync_state, SyncState::UnsyncedOnlyRemote);
    assert!(imported.local_path.is_none());
    assert_eq!(tv.current(&object.meta_hash).await.unwrap(), Some(imported));
}

#[tokio::test]
async fn test_import_of_known_row_returns_it() {
    let tv = common::setup_test_env().await;
    let object = tv.create_file("files/a.txt", b"hi").await.unwrap();
    tv.backend.reset_calls();

    let imported = tv
        .vault
        .import(&object.meta_hash, &object.meta_iv, false)
        .await
        .unwrap();
    assert_eq!(imported, object);
    assert_eq!(tv.backend.calls().network_calls(), 0);
}

#[tokio::test]
async fn test_import_with_wrong_nonce_is_rejected() {
    let tv = common::setup_test_env().await;
    let object = tv.create_file("files/a.txt", b"hi").await.unwrap();
    tv.repo.delete(&object.meta_hash).await.unwrap();

    let wrong = Iv::generate().unwrap();
    let result = tv.vault.import(&object.meta_hash, &wrong, false).await;
    assert!(matches!(
        result,
        Err(VaultError::Import(ImportObjectError::Encryption(
            EncryptionError::IvMismatch(_)
        )))
    ));
    assert!(tv.current(&object.meta_hash).await.unwrap().is_none());
}

#[tokio::test]
async fn test_import_of_unknown_hash_fails() {
    let tv = common::setup_test_env().await;
    let unknown = ObjectHash::digest(b"never uploaded");
    let result = tv
        .vault
        .import(&unknown, &Iv::generate().unwrap(), false)
        .await;
    assert!(matches!(
        result,
        Err(VaultError::Import(ImportObjectError::Backend(_)))
    ));
    assert!(tv.current(&unknown).await.unwrap().is_none());
}

#[tokio::test]
async fn test_import_of_empty_blob_fails() {
    let tv = common::setup_test_env().await;
    let object = tv.create_file("files/a.txt", b"hi").await.unwrap();
    tv.repo.delete(&object.meta_hash).await.unwrap();
    tv.backend.empty_download(object.meta_hash);

    let result = tv
        .vault
        .import(&object.meta_hash, &object.meta_iv, false)
        .await;
    assert!(matches!(
        result,
        Err(VaultError::Import(ImportObjectError::EmptyDownload(_)))
    ));
}

#[tokio::test]
async fn test_recursive_import_registers_descendants() {
    let (tv, _, leaf) = common::setup_chain().await;
    let docs = tv.at("files/docs").await.unwrap();
    tv.repo.delete(&leaf.meta_hash).await.unwrap();
    tv.repo.delete(&docs.meta_hash).await.unwrap();

    tv.vault
        .import(&docs.meta_hash, &docs.meta_iv, true)
        .await
        .unwrap();

    let leaf_row = tv.current(&leaf.meta_hash).await.unwrap().unwrap();
    assert_eq!(leaf_row.sync_state, SyncState::UnsyncedOnlyRemote);
    assert_eq!(leaf_row.name, "leaf.txt");
    let parents = tv.repo.get_parents(&leaf.meta_hash).await.unwrap();
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].meta_hash, docs.meta_hash);
}

#[tokio::test]
async fn test_concurrent_imports_register_one_row() {
    let tv = common::setup_test_env().await;
    let object = tv.create_file("files/a.txt", b"hi").await.unwrap();
    tv.repo.delete(&object.meta_hash).await.unwrap();
    let rows = tv.repo.list().await.unwrap().len();

    let (first, second) = tokio::join!(
        tv.vault.import(&object.meta_hash, &object.meta_iv, false),
        tv.vault.import(&object.meta_hash, &object.meta_iv, false),
    );
    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(tv.repo.list().await.unwrap().len(), rows + 1);
}
