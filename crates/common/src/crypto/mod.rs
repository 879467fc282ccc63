//! Cryptographic primitives and the key lifecycle for cairn objects
//!
//! - **Sealing**: ChaCha20-Poly1305 with a 256-bit [`Secret`] and a random
//!   96-bit [`Iv`] per blob
//! - **Key storage**: named secrets behind the [`KeyStore`] trait
//! - **Bundles**: [`EncryptionBundle`] rows map an uploaded hash back to the
//!   key name and nonce that open it
//! - **Service**: [`EncryptionService`] ties the three together and is the
//!   only component the pipelines talk to
//!
//! # Lifecycle
//!
//! 1. `encrypt` picks a key name, fetches or creates the key, seals with a
//!    fresh nonce, and stores a bundle with no hash yet
//! 2. the caller uploads the ciphertext and `patch_hash`es the bundle
//! 3. later reads look the bundle up by hash and `decrypt`
//! 4. hard deletes call `delete_keys_for_object`

mod bundle;
mod keystore;
mod secret;
mod service;

pub use bundle::{BundleStore, EncryptionBundle, MemoryBundleStore};
pub use keystore::{FsKeyStore, KeyStore, KeyStoreError, MemoryKeyStore};
pub use secret::{Iv, Secret, SecretError, NONCE_SIZE, SECRET_SIZE, TAG_SIZE};
pub use service::{EncryptionError, EncryptionService, KeyNaming};
