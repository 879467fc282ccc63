/**
 * Content-addressed backend contract, plus an
 *  in-memory implementation.
 */
pub mod backend;
/**
 * Cryptographic types and the per-blob key lifecycle.
 *  - Symmetric secrets and nonces
 *  - Key and bundle stores
 *  - The encryption service the pipelines use
 */
pub mod crypto;
/**
 * Content addresses (CIDv1 over BLAKE3).
 */
pub mod hash;
/**
 * Plaintext mirror of object bytes on local disk.
 */
pub mod mirror;
/**
 * The object data model: versions, types, sync
 *  states and the meta record wire format.
 */
pub mod object;
/**
 * Object repository contract and the in-memory
 *  arena implementation.
 */
pub mod repository;
/**
 * In-process harness for integration tests.
 */
pub mod testkit;
/**
 * Create, edit, delete, propagate, sync and import
 *  pipelines, and the lineage-locked facade over them.
 */
pub mod vault;

pub mod prelude {
    pub use crate::backend::{BackendError, ContentBackend};
    pub use crate::crypto::{EncryptionService, Iv, KeyNaming};
    pub use crate::hash::ObjectHash;
    pub use crate::mirror::{FsMirror, LocalMirror};
    pub use crate::object::{ChildRef, ObjectType, SyncState, VaultObject};
    pub use crate::repository::{ObjectRepository, RepoError};
    pub use crate::vault::{CancelToken, CreateRequest, Vault, VaultError};
}
