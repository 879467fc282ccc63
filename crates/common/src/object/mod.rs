//! The object data model
//!
//! A [`VaultObject`] is one immutable version of a logical file or directory.
//! Its identity is `meta_hash`, the backend address of its encrypted
//! [`MetaRecord`]. Directory-like objects list their children as
//! [`ChildRef`]s; that list is the only parent to child link, and the
//! repository answers the reverse question.

mod meta;
mod object_type;
mod sync_state;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::crypto::Iv;
use crate::hash::ObjectHash;

pub use meta::{MetaError, MetaRecord};
pub use object_type::{ObjectType, ObjectTypeParseError, ROOTS_DIR, ROOT_SENTINEL_NAME};
pub use sync_state::{SyncState, SyncStateParseError};

/// Directory (relative to the mirror root) holding plaintext meta records
pub const META_DIR: &str = ".meta";

/// Mirror path of the plaintext meta record for an object stored at `path`.
pub fn meta_path_for(path: &std::path::Path) -> PathBuf {
    let mut meta = PathBuf::from(META_DIR).join(path).into_os_string();
    meta.push(".json");
    PathBuf::from(meta)
}

/// Reference from a parent to one child version: the child's meta hash and
/// the nonce needed to open its meta blob. Encodes as `[hash, ivHex]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(ObjectHash, Iv)", into = "(ObjectHash, Iv)")]
pub struct ChildRef {
    pub meta_hash: ObjectHash,
    pub meta_iv: Iv,
}

impl ChildRef {
    pub fn new(meta_hash: ObjectHash, meta_iv: Iv) -> Self {
        Self { meta_hash, meta_iv }
    }
}

impl From<(ObjectHash, Iv)> for ChildRef {
    fn from((meta_hash, meta_iv): (ObjectHash, Iv)) -> Self {
        Self { meta_hash, meta_iv }
    }
}

impl From<ChildRef> for (ObjectHash, Iv) {
    fn from(child: ChildRef) -> Self {
        (child.meta_hash, child.meta_iv)
    }
}

/// One stored version of an object, as the repository records it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultObject {
    pub meta_hash: ObjectHash,
    pub content_hash: ObjectHash,
    pub previous_version_hash: Option<ObjectHash>,
    pub version: u64,
    pub object_type: ObjectType,
    pub name: String,
    pub timestamp: i64,
    pub decrypted_size: u64,
    pub sync_state: SyncState,
    pub local_path: Option<PathBuf>,
    pub local_meta_path: Option<PathBuf>,
    pub content_iv: Iv,
    pub meta_iv: Iv,
    pub objects: Option<Vec<ChildRef>>,
}

impl VaultObject {
    /// Assemble a row from a decrypted meta record plus the local-only fields.
    pub fn from_meta(
        meta_hash: ObjectHash,
        meta_iv: Iv,
        meta: MetaRecord,
        sync_state: SyncState,
        local_path: Option<PathBuf>,
        local_meta_path: Option<PathBuf>,
    ) -> Self {
        Self {
            meta_hash,
            content_hash: meta.content_hash,
            previous_version_hash: meta.previous_version_hash,
            version: meta.version,
            object_type: meta.object_type,
            name: meta.name,
            timestamp: meta.timestamp,
            decrypted_size: meta.decrypted_size,
            sync_state,
            local_path,
            local_meta_path,
            content_iv: meta.content_iv,
            meta_iv,
            objects: meta.objects,
        }
    }

    /// The meta record this object was built from.
    pub fn meta_record(&self) -> MetaRecord {
        MetaRecord {
            content_hash: self.content_hash,
            previous_version_hash: self.previous_version_hash,
            version: self.version,
            object_type: self.object_type.clone(),
            name: self.name.clone(),
            timestamp: self.timestamp,
            decrypted_size: self.decrypted_size,
            content_iv: self.content_iv,
            objects: self.objects.clone(),
        }
    }

    pub fn child_ref(&self) -> ChildRef {
        ChildRef::new(self.meta_hash, self.meta_iv)
    }

    pub fn is_directory(&self) -> bool {
        self.objects.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.object_type.is_root()
    }

    pub fn children(&self) -> &[ChildRef] {
        self.objects.as_deref().unwrap_or_default()
    }

    /// Whether this object lists `meta_hash` among its children.
    pub fn references(&self, meta_hash: &ObjectHash) -> bool {
        self.children().iter().any(|c| &c.meta_hash == meta_hash)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_meta_path_for() {
        assert_eq!(
            meta_path_for(std::path::Path::new("files/docs/a.txt")),
            PathBuf::from(".meta/files/docs/a.txt.json")
        );
    }

    #[test]
    fn test_child_ref_encodes_as_pair() {
        let child = ChildRef::new(ObjectHash::digest(b"c"), Iv::from([2u8; 12]));
        let json = serde_json::to_value(child).unwrap();
        assert_eq!(
            json,
            serde_json::json!([child.meta_hash.to_string(), "02".repeat(12)])
        );
        let back: ChildRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, child);
    }

    #[test]
    fn test_meta_record_round_trips_through_object() {
        let meta = MetaRecord {
            content_hash: ObjectHash::digest(b"content"),
            previous_version_hash: Some(ObjectHash::digest(b"prev")),
            version: 4,
            object_type: ObjectType::Raw,
            name: "dir".to_string(),
            timestamp: 5,
            decrypted_size: 0,
            content_iv: Iv::from([3u8; 12]),
            objects: Some(vec![ChildRef::new(
                ObjectHash::digest(b"kid"),
                Iv::from([4u8; 12]),
            )]),
        };
        let object = VaultObject::from_meta(
            ObjectHash::digest(b"meta"),
            Iv::from([5u8; 12]),
            meta.clone(),
            SyncState::UnsyncedOnlyRemote,
            None,
            None,
        );
        assert_eq!(object.meta_record(), meta);
        assert!(object.is_directory());
        assert!(object.references(&ObjectHash::digest(b"kid")));
        assert!(!object.references(&ObjectHash::digest(b"other")));
    }
}
