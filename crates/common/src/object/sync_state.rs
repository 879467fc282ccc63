use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where an object's bytes currently live. Local-only: never part of the
/// meta record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    /// Present nowhere
    #[default]
    None,
    /// Both halves present locally and on the backend
    Synced,
    /// Known and uploaded, bytes not fetched locally
    UnsyncedOnlyRemote,
    /// Created with `only_locally`, nothing uploaded
    UnsyncedOnlyLocal,
    /// Directory present locally with some children still remote
    UnsyncedOnlyPartly,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::None => "NONE",
            SyncState::Synced => "SYNCED",
            SyncState::UnsyncedOnlyRemote => "UNSYNCED_ONLY_REMOTE",
            SyncState::UnsyncedOnlyLocal => "UNSYNCED_ONLY_LOCAL",
            SyncState::UnsyncedOnlyPartly => "UNSYNCED_ONLY_PARTLY",
        }
    }

    /// Whether the backend holds (and pins) this object's blobs.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            SyncState::Synced | SyncState::UnsyncedOnlyRemote | SyncState::UnsyncedOnlyPartly
        )
    }

    /// Whether the object's own bytes are in the local mirror.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            SyncState::Synced | SyncState::UnsyncedOnlyLocal | SyncState::UnsyncedOnlyPartly
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("unknown sync state: {0}")]
pub struct SyncStateParseError(String);

impl FromStr for SyncState {
    type Err = SyncStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(SyncState::None),
            "SYNCED" => Ok(SyncState::Synced),
            "UNSYNCED_ONLY_REMOTE" => Ok(SyncState::UnsyncedOnlyRemote),
            "UNSYNCED_ONLY_LOCAL" => Ok(SyncState::UnsyncedOnlyLocal),
            "UNSYNCED_ONLY_PARTLY" => Ok(SyncState::UnsyncedOnlyPartly),
            other => Err(SyncStateParseError(other.to_string())),
        }
    }
}
