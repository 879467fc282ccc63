use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use common::crypto::{FsKeyStore, KeyNaming, KeyStoreError};
use common::mirror::{FsMirror, MirrorError};
use common::object::ObjectType;
use common::vault::{Vault, VaultError};
use serde::{Deserialize, Serialize};
use store::{ObjectStoreConfig, StoreError, VaultStore};

pub const APP_NAME: &str = "cairn";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "db.sqlite";
pub const KEYS_DIR_NAME: &str = "keys";
pub const MIRROR_DIR_NAME: &str = "mirror";
pub const BLOBS_DIR_NAME: &str = "blobs";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default log level, overridable with RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily-rolling log files (stderr only when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// How key names are chosen for new blobs
    #[serde(default)]
    pub key_naming: KeyNaming,
    /// Type namespace used when a command does not name one
    #[serde(default = "default_type")]
    pub default_type: ObjectType,
    /// Where sealed blobs are stored
    #[serde(default)]
    pub backend: ObjectStoreConfig,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_type() -> ObjectType {
    ObjectType::File
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: None,
            key_naming: KeyNaming::default(),
            default_type: default_type(),
            backend: ObjectStoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the cairn directory (~/.cairn)
    pub cairn_dir: PathBuf,
    pub db_path: PathBuf,
    pub keys_path: PathBuf,
    pub mirror_path: PathBuf,
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the cairn directory path (custom or default ~/.cairn)
    pub fn cairn_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }
        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new cairn state directory.
    ///
    /// A config without a backend keeps blobs under `<cairn dir>/blobs`.
    pub fn init(custom_path: Option<PathBuf>, config: Option<AppConfig>) -> Result<Self, StateError> {
        let cairn_dir = Self::cairn_dir(custom_path)?;
        if cairn_dir.join(CONFIG_FILE_NAME).exists() {
            return Err(StateError::AlreadyInitialized);
        }

        let mut config = config.unwrap_or_default();
        if config.backend == ObjectStoreConfig::Memory {
            config.backend = ObjectStoreConfig::Local {
                path: cairn_dir.join(BLOBS_DIR_NAME),
            };
        }

        fs::create_dir_all(&cairn_dir)?;
        let state = Self::paths(cairn_dir, config);
        fs::create_dir_all(&state.keys_path)?;
        fs::create_dir_all(&state.mirror_path)?;
        fs::write(&state.config_path, toml::to_string_pretty(&state.config)?)?;
        Ok(state)
    }

    /// Load existing state from the cairn directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let cairn_dir = Self::cairn_dir(custom_path)?;
        let config_path = cairn_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::NotInitialized);
        }

        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;
        let state = Self::paths(cairn_dir, config);
        for (path, name) in [(&state.keys_path, "keys/"), (&state.mirror_path, "mirror/")] {
            if !path.exists() {
                return Err(StateError::MissingFile(name.to_string()));
            }
        }
        Ok(state)
    }

    fn paths(cairn_dir: PathBuf, config: AppConfig) -> Self {
        Self {
            db_path: cairn_dir.join(DB_FILE_NAME),
            keys_path: cairn_dir.join(KEYS_DIR_NAME),
            mirror_path: cairn_dir.join(MIRROR_DIR_NAME),
            config_path: cairn_dir.join(CONFIG_FILE_NAME),
            cairn_dir,
            config,
        }
    }

    /// Open the database, blob storage, key store and mirror, and assemble
    /// a vault over them.
    pub async fn open_vault(&self) -> Result<Vault, StateError> {
        let store = VaultStore::open(&self.db_path, &self.config.backend).await?;
        let keys = FsKeyStore::open(&self.keys_path).await?;
        let mirror = FsMirror::open(&self.mirror_path).await?;
        let vault = store
            .vault_builder()
            .key_store(Arc::new(keys))
            .mirror(Arc::new(mirror))
            .key_naming(self.config.key_naming)
            .build()?;
        Ok(vault)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("cairn directory not initialized. Run 'cairn init' first")]
    NotInitialized,

    #[error("cairn directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("key store error: {0}")]
    Keys(#[from] KeyStoreError),

    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),

    #[error(transparent)]
    Vault(#[from] VaultError),
}
