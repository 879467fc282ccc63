use serde::{Deserialize, Serialize};

use super::{ChildRef, ObjectType};
use crate::crypto::Iv;
use crate::hash::ObjectHash;

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("failed to encode meta record: {0}")]
    Encode(serde_json::Error),
    #[error("failed to decode meta record: {0}")]
    Decode(serde_json::Error),
}

/// The plaintext of an object's meta blob.
///
/// This is the only part of an object the backend ever learns about (in
/// encrypted form). Sync state, local paths and the meta nonce itself stay
/// local.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaRecord {
    pub content_hash: ObjectHash,
    pub previous_version_hash: Option<ObjectHash>,
    pub version: u64,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub name: String,
    /// Unix milliseconds
    pub timestamp: i64,
    pub decrypted_size: u64,
    #[serde(rename = "contentIV")]
    pub content_iv: Iv,
    pub objects: Option<Vec<ChildRef>>,
}

impl MetaRecord {
    /// Serialize to the JSON wire form. Field order follows the struct, so
    /// equal records always encode to equal bytes.
    pub fn encode(&self) -> Result<Vec<u8>, MetaError> {
        serde_json::to_vec(self).map_err(MetaError::Encode)
    }

    pub fn decode(data: &[u8]) -> Result<Self, MetaError> {
        serde_json::from_slice(data).map_err(MetaError::Decode)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(objects: Option<Vec<ChildRef>>) -> MetaRecord {
        MetaRecord {
            content_hash: ObjectHash::digest(b"content"),
            previous_version_hash: None,
            version: 1,
            object_type: ObjectType::File,
            name: "a.txt".to_string(),
            timestamp: 1_700_000_000_000,
            decrypted_size: 2,
            content_iv: Iv::from([7u8; 12]),
            objects,
        }
    }

    #[test]
    fn test_wire_field_names() {
        let child = ChildRef::new(ObjectHash::digest(b"child"), Iv::from([1u8; 12]));
        let json: serde_json::Value =
            serde_json::from_slice(&record(Some(vec![child.clone()])).encode().unwrap()).unwrap();

        let obj = json.as_object().unwrap();
        for field in [
            "contentHash",
            "previousVersionHash",
            "version",
            "type",
            "name",
            "timestamp",
            "decryptedSize",
            "contentIV",
            "objects",
        ] {
            assert!(obj.contains_key(field), "missing {}", field);
        }
        assert_eq!(obj.len(), 9);
        assert_eq!(json["type"], "file");
        assert_eq!(json["contentIV"], "07".repeat(12));
        assert!(json["previousVersionHash"].is_null());
        assert_eq!(json["objects"][0][0], child.meta_hash.to_string());
        assert_eq!(json["objects"][0][1], "01".repeat(12));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            MetaRecord::decode(b"{\"contentHash\":1}"),
            Err(MetaError::Decode(_))
        ));
        let leaf = record(None);
        assert_eq!(MetaRecord::decode(&leaf.encode().unwrap()).unwrap(), leaf);
    }
}
