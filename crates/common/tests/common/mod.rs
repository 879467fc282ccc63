//! Shared test utilities for vault integration tests
#![allow(dead_code)]

use common::object::VaultObject;
use common::testkit::TestVault;

/// Route engine logs to the test writer; RUST_LOG picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A vault with the `files` namespace directory already created
pub async fn setup_test_env() -> TestVault {
    init_tracing();
    let tv = TestVault::new().await.unwrap();
    tv.mkdir("files").await.unwrap();
    tv
}

/// `files/docs/leaf.txt` under the `files` root, returned as (dir, leaf)
pub async fn setup_chain() -> (TestVault, VaultObject, VaultObject) {
    let tv = setup_test_env().await;
    let docs = tv.mkdir("files/docs").await.unwrap();
    let leaf = tv
        .create_file("files/docs/leaf.txt", b"leaf v1")
        .await
        .unwrap();
    (tv, docs, leaf)
}

/// Hashes reachable from `top` by following child lists through the repo
pub async fn reachable(tv: &TestVault, top: &VaultObject) -> Vec<common::hash::ObjectHash> {
    let mut found = Vec::new();
    let mut stack = vec![top.clone()];
    while let Some(node) = stack.pop() {
        for child in node.children() {
            found.push(child.meta_hash);
            if let Some(row) = tv.current(&child.meta_hash).await.unwrap() {
                stack.push(row);
            }
        }
    }
    found
}
