/// Test harness for vault integration tests
///
/// Wires a [`Vault`](crate::vault::Vault) to in-memory collaborators, a
/// call-counting backend that can be told to misbehave, and a mirror rooted
/// in a temporary directory.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::TestVault;
///
/// #[tokio::test]
/// async fn test_create() -> anyhow::Result<()> {
///     let tv = TestVault::new().await?;
///     let docs = tv.mkdir("files").await?;
///     let note = tv.create_file("files/note.txt", b"hello").await?;
///
///     assert_eq!(tv.vault.read(&note.meta_hash).await?, b"hello");
///     assert_eq!(tv.backend.calls().unpins.len(), 0);
///     Ok(())
/// }
/// ```
mod backend;
mod harness;

pub use backend::{BackendCalls, CountingBackend};
pub use harness::TestVault;
