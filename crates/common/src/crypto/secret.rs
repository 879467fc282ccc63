//! Content encryption using ChaCha20-Poly1305
//!
//! Every object half (content and meta) is sealed under a named [`Secret`]
//! with its own random [`Iv`]. The nonce is kept outside the ciphertext: it
//! travels in the encryption bundle and in parent child-refs, so the uploaded
//! blob is exactly the AEAD output and nothing else.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use chacha20poly1305::Key;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use serde_with::{DeserializeFromStr, SerializeDisplay};

/// Size of ChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of ChaCha20-Poly1305 key in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;
/// Size of the Poly1305 authentication tag appended to every ciphertext
pub const TAG_SIZE: usize = 16;

/// Errors that can occur during encryption/decryption
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("random source unavailable: {0}")]
    Random(String),
    #[error("invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),
}

fn random_bytes<const N: usize>() -> Result<[u8; N], SecretError> {
    let mut buff = [0u8; N];
    getrandom::getrandom(&mut buff).map_err(|e| SecretError::Random(e.to_string()))?;
    Ok(buff)
}

/// A 256-bit symmetric encryption key
///
/// Secrets live in a [`KeyStore`](super::KeyStore) under a name; the engine
/// never persists raw key bytes anywhere else.
#[derive(PartialEq, Clone)]
pub struct Secret([u8; SECRET_SIZE]);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl Deref for Secret {
    type Target = [u8; SECRET_SIZE];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl Secret {
    /// Generate a new random secret using the operating system RNG
    pub fn generate() -> Result<Self, SecretError> {
        Ok(Self(random_bytes()?))
    }

    /// Create a secret from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `SECRET_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != SECRET_SIZE {
            return Err(anyhow::anyhow!(
                "invalid secret size, expected {}, got {}",
                SECRET_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0; SECRET_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    pub fn from_hex(hex: &str) -> Result<Self, SecretError> {
        let bytes = hex::decode(hex.trim())?;
        Self::from_slice(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get a reference to the secret key bytes
    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    /// Seal `data` under this key with the given nonce.
    ///
    /// The output is `ciphertext || tag`. Sealing the same plaintext with the
    /// same key and nonce always yields the same bytes.
    pub fn encrypt(&self, iv: &Iv, data: &[u8]) -> Result<Vec<u8>, SecretError> {
        let key = Key::from_slice(self.bytes());
        let cipher = ChaCha20Poly1305::new(key);
        cipher
            .encrypt(Nonce::from_slice(iv.bytes()), data)
            .map_err(|_| anyhow::anyhow!("encrypt error").into())
    }

    /// Open a ciphertext produced by [`Secret::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns an error if the data is shorter than a tag or the
    /// authentication tag does not verify (wrong key, wrong nonce, tampering).
    pub fn decrypt(&self, iv: &Iv, data: &[u8]) -> Result<Vec<u8>, SecretError> {
        if data.len() < TAG_SIZE {
            return Err(anyhow::anyhow!("data too short for authentication tag").into());
        }
        let key = Key::from_slice(self.bytes());
        let cipher = ChaCha20Poly1305::new(key);
        cipher
            .decrypt(Nonce::from_slice(iv.bytes()), data)
            .map_err(|_| anyhow::anyhow!("decrypt error").into())
    }
}

/// Initialization vector (nonce) for a single sealed blob.
///
/// Losing an object's IVs makes it unrecoverable even when its hash and key
/// are known.
#[derive(Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct Iv([u8; NONCE_SIZE]);

impl Iv {
    pub fn generate() -> Result<Self, SecretError> {
        Ok(Self(random_bytes()?))
    }

    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != NONCE_SIZE {
            return Err(anyhow::anyhow!(
                "invalid iv size, expected {}, got {}",
                NONCE_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0; NONCE_SIZE];
        buff.copy_from_slice(data);
        Ok(Self(buff))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex: &str) -> Result<Self, SecretError> {
        let bytes = hex::decode(hex.trim())?;
        Self::from_slice(&bytes)
    }
}

impl From<[u8; NONCE_SIZE]> for Iv {
    fn from(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Iv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Iv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iv({})", self.to_hex())
    }
}

impl FromStr for Iv {
    type Err = SecretError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_secret_encrypt_decrypt() {
        let secret = Secret::generate().unwrap();
        let iv = Iv::generate().unwrap();
        let data = b"hello world, this is a test message for encryption";

        let encrypted = secret.encrypt(&iv, data).unwrap();
        assert_eq!(encrypted.len(), data.len() + TAG_SIZE);
        let decrypted = secret.decrypt(&iv, &encrypted).unwrap();

        assert_eq!(data.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_encrypt_is_deterministic_for_fixed_iv() {
        let secret = Secret::generate().unwrap();
        let iv = Iv::generate().unwrap();
        let a = secret.encrypt(&iv, b"same").unwrap();
        let b = secret.encrypt(&iv, b"same").unwrap();
        assert_eq!(a, b);

        let other_iv = Iv::generate().unwrap();
        let c = secret.encrypt(&other_iv, b"same").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_secret_size_validation() {
        let too_short = [1u8; 16];
        let too_long = [1u8; 64];

        assert!(Secret::from_slice(&too_short).is_err());
        assert!(Secret::from_slice(&too_long).is_err());

        let just_right = [1u8; SECRET_SIZE];
        assert!(Secret::from_slice(&just_right).is_ok());
    }

    #[test]
    fn test_wrong_iv_fails_authentication() {
        let secret = Secret::generate().unwrap();
        let iv = Iv::generate().unwrap();
        let encrypted = secret.encrypt(&iv, b"payload").unwrap();

        let wrong = Iv::generate().unwrap();
        assert!(secret.decrypt(&wrong, &encrypted).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_is_rejected() {
        let secret = Secret::generate().unwrap();
        let iv = Iv::generate().unwrap();
        let mut encrypted = secret.encrypt(&iv, b"test data for integrity check").unwrap();
        encrypted[3] ^= 0xFF;
        assert!(secret.decrypt(&iv, &encrypted).is_err());
        assert!(secret.decrypt(&iv, &encrypted[..4]).is_err());
    }

    #[test]
    fn test_empty_data_encryption() {
        let secret = Secret::generate().unwrap();
        let iv = Iv::generate().unwrap();

        let encrypted = secret.encrypt(&iv, b"").unwrap();
        assert_eq!(encrypted.len(), TAG_SIZE);
        let decrypted = secret.decrypt(&iv, &encrypted).unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_hex_round_trip() {
        let secret = Secret::generate().unwrap();
        assert_eq!(Secret::from_hex(&secret.to_hex()).unwrap(), secret);

        let iv = Iv::generate().unwrap();
        assert_eq!(iv.to_string().parse::<Iv>().unwrap(), iv);
        assert!("zz".parse::<Iv>().is_err());
    }
}
