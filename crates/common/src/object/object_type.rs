use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Directory (relative to the mirror root) holding every root sentinel
pub const ROOTS_DIR: &str = ".roots";
/// Reserved name given to root sentinels
pub const ROOT_SENTINEL_NAME: &str = ".root";

/// Kind of a stored object.
///
/// `Root(T)` is the sentinel anchoring the namespace of type `T`; there is at
/// most one per `T`, and `T` itself is never a root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Meta,
    Raw,
    File,
    Root(Box<ObjectType>),
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("unknown object type: {0}")]
pub struct ObjectTypeParseError(String);

impl ObjectType {
    /// The sentinel type anchoring this type's namespace.
    pub fn root_type(&self) -> ObjectType {
        ObjectType::Root(Box::new(self.namespace()))
    }

    /// The type whose namespace this object lives in (`T` for both `T` and `Root(T)`).
    pub fn namespace(&self) -> ObjectType {
        match self {
            ObjectType::Root(inner) => inner.namespace(),
            other => other.clone(),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, ObjectType::Root(_))
    }

    /// Mirror path of the top-level object of this type's namespace.
    ///
    /// An object created at exactly this path becomes the single child of the
    /// type's root sentinel.
    pub fn root_path(&self) -> PathBuf {
        match self {
            ObjectType::Meta => PathBuf::from("meta"),
            ObjectType::Raw => PathBuf::from("raw"),
            ObjectType::File => PathBuf::from("files"),
            ObjectType::Root(inner) => PathBuf::from(ROOTS_DIR).join(inner.namespace().label()),
        }
    }

    /// Short label used in key names and text columns.
    pub fn label(&self) -> String {
        match self {
            ObjectType::Meta => "meta".to_string(),
            ObjectType::Raw => "raw".to_string(),
            ObjectType::File => "file".to_string(),
            ObjectType::Root(inner) => format!("root:{}", inner.namespace().label()),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for ObjectType {
    type Err = ObjectTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meta" => Ok(ObjectType::Meta),
            "raw" => Ok(ObjectType::Raw),
            "file" => Ok(ObjectType::File),
            other => match other.strip_prefix("root:") {
                Some(inner) => Ok(inner.parse::<ObjectType>()?.root_type()),
                None => Err(ObjectTypeParseError(other.to_string())),
            },
        }
    }
}
