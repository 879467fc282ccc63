use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bundle::{BundleStore, EncryptionBundle};
use super::keystore::{KeyStore, KeyStoreError};
use super::secret::{Iv, Secret, SecretError};
use crate::hash::ObjectHash;
use crate::object::VaultObject;
use crate::repository::RepoError;

/// How key names are chosen for freshly sealed blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyNaming {
    /// `<label>-<random uuid>`: every sealed blob gets its own key
    #[default]
    Random,
    /// `<label>-<blake3(label || plaintext)>`: identical plaintexts under one
    ///  label share a key
    ContentDerived,
}

impl KeyNaming {
    fn key_name(&self, data: &[u8], label: &str) -> String {
        match self {
            KeyNaming::Random => format!("{}-{}", label, Uuid::new_v4().simple()),
            KeyNaming::ContentDerived => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(label.as_bytes());
                hasher.update(data);
                format!("{}-{}", label, hasher.finalize().to_hex())
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),
    #[error("cipher error: {0}")]
    Cipher(#[from] SecretError),
    #[error("bundle error: {0}")]
    Bundle(#[from] RepoError),
    #[error("key '{0}' is not present in the key store")]
    KeyNotFound(String),
    #[error("no encryption bundle recorded for hash {0}")]
    BundleNotFound(ObjectHash),
    #[error("iv does not match the bundle recorded for hash {0}")]
    IvMismatch(ObjectHash),
}

/// Per-blob key lifecycle and authenticated encryption.
///
/// Sealing records an [`EncryptionBundle`] before the ciphertext has a hash;
/// callers patch the hash in with [`EncryptionService::patch_hash`] once the
/// backend has accepted the blob.
#[derive(Debug, Clone)]
pub struct EncryptionService {
    keys: Arc<dyn KeyStore>,
    bundles: Arc<dyn BundleStore>,
    naming: KeyNaming,
}

impl EncryptionService {
    pub fn new(keys: Arc<dyn KeyStore>, bundles: Arc<dyn BundleStore>, naming: KeyNaming) -> Self {
        Self {
            keys,
            bundles,
            naming,
        }
    }

    pub fn naming(&self) -> KeyNaming {
        self.naming
    }

    /// Seal `data` under a (possibly new) key named after `label`.
    pub async fn encrypt(
        &self,
        data: &[u8],
        label: &str,
    ) -> Result<(Vec<u8>, EncryptionBundle), EncryptionError> {
        let key_name = self.naming.key_name(data, label);
        let secret = self.keys.get_or_create_key(&key_name).await?;
        let iv = Iv::generate()?;
        let ciphertext = secret.encrypt(&iv, data)?;

        let bundle = EncryptionBundle::new(key_name, iv);
        self.bundles.insert(&bundle).await?;
        tracing::trace!(key = %bundle.key_name, size = data.len(), "sealed blob");
        Ok((ciphertext, bundle))
    }

    /// Attach the backend hash to a bundle created by [`EncryptionService::encrypt`].
    pub async fn patch_hash(
        &self,
        bundle: &EncryptionBundle,
        hash: &ObjectHash,
    ) -> Result<EncryptionBundle, EncryptionError> {
        self.bundles.patch_hash(bundle.id, hash).await?;
        let mut patched = bundle.clone();
        patched.hash = Some(*hash);
        Ok(patched)
    }

    /// Drop a bundle whose blob never made it onto the backend, and its key
    /// when nothing else names it.
    pub async fn discard(&self, bundle: &EncryptionBundle) -> Result<(), EncryptionError> {
        self.bundles.delete(bundle.id).await?;
        self.forget_key_if_unused(&bundle.key_name).await
    }

    pub async fn decrypt(
        &self,
        bundle: &EncryptionBundle,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, EncryptionError> {
        let secret = self.named_key(&bundle.key_name).await?;
        Ok(secret.decrypt(&bundle.iv, ciphertext)?)
    }

    /// Seal `plaintext` again with the exact key and nonce of an existing
    /// bundle. Identical plaintext reproduces the identical ciphertext, and so
    /// the identical content address.
    pub async fn reseal(
        &self,
        bundle: &EncryptionBundle,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EncryptionError> {
        let secret = self.named_key(&bundle.key_name).await?;
        Ok(secret.encrypt(&bundle.iv, plaintext)?)
    }

    pub async fn lookup_bundle_by_hash(
        &self,
        hash: &ObjectHash,
    ) -> Result<EncryptionBundle, EncryptionError> {
        self.bundles
            .get_by_hash(hash)
            .await?
            .ok_or(EncryptionError::BundleNotFound(*hash))
    }

    pub async fn lookup_key_name_by_hash(
        &self,
        hash: &ObjectHash,
    ) -> Result<String, EncryptionError> {
        Ok(self.lookup_bundle_by_hash(hash).await?.key_name)
    }

    pub async fn lookup_key_by_hash(&self, hash: &ObjectHash) -> Result<Secret, EncryptionError> {
        let key_name = self.lookup_key_name_by_hash(hash).await?;
        self.named_key(&key_name).await
    }

    /// Decrypt a downloaded blob given only its hash and the nonce the caller
    /// holds for it. The nonce must match the recorded bundle.
    pub async fn decrypt_blob(
        &self,
        hash: &ObjectHash,
        iv: &Iv,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, EncryptionError> {
        let bundle = self.lookup_bundle_by_hash(hash).await?;
        if bundle.iv != *iv {
            return Err(EncryptionError::IvMismatch(*hash));
        }
        self.decrypt(&bundle, ciphertext).await
    }

    /// Erase the content and meta keys of a hard-deleted object.
    pub async fn delete_keys_for_object(&self, object: &VaultObject) -> Result<(), EncryptionError> {
        self.delete_keys_for_hash(&object.content_hash).await?;
        self.delete_keys_for_hash(&object.meta_hash).await
    }

    /// Drop every bundle for `hash`, and each key no other bundle still names.
    pub async fn delete_keys_for_hash(&self, hash: &ObjectHash) -> Result<(), EncryptionError> {
        let removed = self.bundles.delete_by_hash(hash).await?;
        for bundle in removed {
            self.forget_key_if_unused(&bundle.key_name).await?;
        }
        Ok(())
    }

    async fn forget_key_if_unused(&self, key_name: &str) -> Result<(), EncryptionError> {
        if self.bundles.count_by_key_name(key_name).await? == 0 {
            self.keys.delete_key(key_name).await?;
            tracing::debug!(key = %key_name, "deleted key");
        }
        Ok(())
    }

    async fn named_key(&self, key_name: &str) -> Result<Secret, EncryptionError> {
        self.keys
            .get_key(key_name)
            .await?
            .ok_or_else(|| EncryptionError::KeyNotFound(key_name.to_string()))
    }
}
