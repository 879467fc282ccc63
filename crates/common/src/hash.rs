//! Content addresses
//!
//! Every blob the engine hands to a backend is identified by an [`ObjectHash`]:
//! a CIDv1 with the raw codec and a BLAKE3 multihash. Backends report hashes as
//! text, so parsing doubles as the well-formedness check the pipelines rely on.

use std::fmt;
use std::str::FromStr;

use cid::Cid;
use multihash::Multihash;
use serde_with::{DeserializeFromStr, SerializeDisplay};

/// Multicodec code for raw bytes
pub const RAW_CODEC: u64 = 0x55;
/// Multihash code for BLAKE3 (256 bit)
pub const BLAKE3_MULTIHASH_CODE: u64 = 0x1e;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("malformed content hash '{0}': {1}")]
    Malformed(String, String),
}

/// Hash of an (encrypted) blob as stored in a content-addressed backend.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub struct ObjectHash(Cid);

impl ObjectHash {
    /// Compute the canonical content address of `data`.
    ///
    /// Every backend implementation in this workspace hashes through here, so a
    /// hash-only upload and a real upload of the same bytes always agree.
    pub fn digest(data: &[u8]) -> Self {
        let digest = blake3::hash(data);
        // a 32 byte digest always fits the 64 byte multihash allocation
        let multihash = Multihash::<64>::wrap(BLAKE3_MULTIHASH_CODE, digest.as_bytes())
            .unwrap_or_default();
        Self(Cid::new_v1(RAW_CODEC, multihash))
    }

    pub fn cid(&self) -> &Cid {
        &self.0
    }

    /// Parse backend-reported hash text, rejecting anything that is not a CID.
    pub fn parse(value: &str) -> Result<Self, HashError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(HashError::Malformed(
                value.to_string(),
                "empty hash".to_string(),
            ));
        }
        Cid::try_from(trimmed)
            .map(Self)
            .map_err(|e| HashError::Malformed(value.to_string(), e.to_string()))
    }
}

impl From<Cid> for ObjectHash {
    fn from(cid: Cid) -> Self {
        Self(cid)
    }
}

impl FromStr for ObjectHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ObjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ObjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHash({})", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_digest_is_stable() {
        let a = ObjectHash::digest(b"hello");
        let b = ObjectHash::digest(b"hello");
        let c = ObjectHash::digest(b"world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.cid().codec(), RAW_CODEC);
        assert_eq!(a.cid().hash().code(), BLAKE3_MULTIHASH_CODE);
    }

    #[test]
    fn test_parse_text_form() {
        let hash = ObjectHash::digest(b"some bytes");
        let text = hash.to_string();
        assert!(text.starts_with('b'));
        assert_eq!(ObjectHash::parse(&text).unwrap(), hash);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ObjectHash::parse("").is_err());
        assert!(ObjectHash::parse("   ").is_err());
        assert!(ObjectHash::parse("not-a-cid").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let hash = ObjectHash::digest(b"serde");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash));
        let back: ObjectHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
