use std::path::PathBuf;

use clap::Args;
use common::crypto::KeyNaming;
use common::vault::{CreateRequest, VaultError};
use store::ObjectStoreConfig;

use crate::state::{AppConfig, AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Directory for sealed blobs (defaults to <state dir>/blobs)
    #[arg(long)]
    pub blobs: Option<PathBuf>,

    /// Derive key names from content, so identical plaintexts share a key
    #[arg(long)]
    pub content_derived_keys: bool,

    /// Default log level
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Directory for daily-rolling log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
    #[error("failed to create the namespace directory: {0}")]
    Vault(#[from] VaultError),
}

#[async_trait::async_trait]
impl crate::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = AppConfig {
            log_level: self.log_level.clone(),
            log_dir: self.log_dir.clone(),
            key_naming: if self.content_derived_keys {
                KeyNaming::ContentDerived
            } else {
                KeyNaming::Random
            },
            backend: self
                .blobs
                .clone()
                .map(|path| ObjectStoreConfig::Local { path })
                .unwrap_or_default(),
            ..AppConfig::default()
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;
        let vault = state.open_vault().await?;

        // the namespace directory that every default path lands in
        let object_type = state.config.default_type.clone();
        let root_path = object_type.root_path();
        let request = CreateRequest::directory(root_path.to_string_lossy(), object_type)
            .at(root_path.clone());
        let top = vault.create(request, &ctx.cancel).await?;

        Ok(format!(
            "Initialized cairn directory at: {}\n\
             - Database: {}\n\
             - Keys: {}\n\
             - Mirror: {}\n\
             - Config: {}\n\
             - Blobs: {:?}\n\
             - Top-level directory: {} ({})",
            state.cairn_dir.display(),
            state.db_path.display(),
            state.keys_path.display(),
            state.mirror_path.display(),
            state.config_path.display(),
            state.config.backend,
            root_path.display(),
            top.meta_hash,
        ))
    }
}
