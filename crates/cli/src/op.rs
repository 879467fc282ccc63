use std::error::Error;
use std::path::{Path, PathBuf};

use common::hash::ObjectHash;
use common::object::{ObjectType, VaultObject};
use common::vault::{CancelToken, Vault, VaultError};

use crate::state::{AppState, StateError};

#[derive(Clone)]
pub struct OpContext {
    /// Optional custom state directory (defaults to ~/.cairn)
    pub config_path: Option<PathBuf>,
    /// Flipped by ctrl-c
    pub cancel: CancelToken,
}

impl OpContext {
    pub fn new(config_path: Option<PathBuf>, cancel: CancelToken) -> Self {
        Self {
            config_path,
            cancel,
        }
    }

    pub fn state(&self) -> Result<AppState, StateError> {
        AppState::load(self.config_path.clone())
    }

    /// Load state and open the vault it describes.
    pub async fn vault(&self) -> Result<(AppState, Vault), StateError> {
        let state = self.state()?;
        let vault = state.open_vault().await?;
        Ok((state, vault))
    }
}

/// Errors shared by every op that works on an opened vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultOpError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no object at {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Look an object up by meta hash, or failing that by mirror path.
pub async fn resolve(vault: &Vault, target: &str) -> Result<VaultObject, VaultOpError> {
    if let Ok(hash) = ObjectHash::parse(target) {
        return Ok(vault.get(&hash).await?);
    }
    vault
        .find_by_path(Path::new(target.trim_end_matches('/')))
        .await?
        .ok_or_else(|| VaultOpError::NotFound(target.to_string()))
}

/// Mirror path of `name` directly under the namespace directory of `object_type`.
pub fn default_path(object_type: &ObjectType, name: &str) -> PathBuf {
    object_type.root_path().join(name)
}

/// One listing line: state, version, name and meta hash.
pub fn describe(object: &VaultObject) -> String {
    let kind = if object.is_directory() { "dir " } else { "file" };
    format!(
        "{} {:<22} v{:<3} {:<24} {}",
        kind,
        object.sync_state.as_str(),
        object.version,
        object.name,
        object.meta_hash
    )
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $type:ty)),* $(,)?) => {
        #[derive(Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($type),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$type as $crate::op::Op>::Output),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$type as $crate::op::Op>::Error),
            )*
        }

        #[async_trait::async_trait]
        impl $crate::op::Op for Command {
            type Output = OpOutput;
            type Error = OpError;

            async fn execute(&self, ctx: &$crate::op::OpContext) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => {
                            op.execute(ctx).await
                                .map(OpOutput::$variant)
                                .map_err(OpError::$variant)
                        },
                    )*
                }
            }
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        OpOutput::$variant(output) => write!(f, "{}", output),
                    )*
                }
            }
        }
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ops::{Add, Cat, Init, Ls, Rename, Rm};

    async fn initialized(dir: &tempfile::TempDir) -> OpContext {
        let ctx = OpContext::new(Some(dir.path().join("state")), CancelToken::never());
        Init {
            blobs: None,
            content_derived_keys: false,
            log_level: "warn".to_string(),
            log_dir: None,
        }
        .execute(&ctx)
        .await
        .unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_add_ls_cat_rm() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = initialized(&dir).await;
        let source = dir.path().join("note.txt");
        std::fs::write(&source, "remember the milk").unwrap();

        Add {
            source,
            at: None,
            local_only: false,
            overwrite: false,
        }
        .execute(&ctx)
        .await
        .unwrap();

        let listing = Ls {
            target: None,
            all: false,
        }
        .execute(&ctx)
        .await
        .unwrap();
        assert!(listing.contains("note.txt"));
        assert!(listing.contains("SYNCED"));

        let text = Cat {
            target: "files/note.txt".to_string(),
        }
        .execute(&ctx)
        .await
        .unwrap();
        assert_eq!(text, "remember the milk");

        Rename {
            target: "files/note.txt".to_string(),
            name: "todo.txt".to_string(),
        }
        .execute(&ctx)
        .await
        .unwrap();
        Rm {
            target: "files/todo.txt".to_string(),
            local: false,
            force: false,
        }
        .execute(&ctx)
        .await
        .unwrap();

        let listing = Ls {
            target: None,
            all: false,
        }
        .execute(&ctx)
        .await
        .unwrap();
        assert_eq!(listing, "No items found");
    }

    #[tokio::test]
    async fn test_resolve_unknown_path() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = initialized(&dir).await;
        let (_, vault) = ctx.vault().await.unwrap();
        assert!(matches!(
            resolve(&vault, "files/missing.txt").await,
            Err(VaultOpError::NotFound(_))
        ));
        assert!(resolve(&vault, "files/").await.unwrap().is_directory());
    }

    #[test]
    fn test_default_path() {
        assert_eq!(
            default_path(&ObjectType::File, "a.txt"),
            PathBuf::from("files/a.txt")
        );
    }
}
