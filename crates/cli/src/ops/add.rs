use std::path::PathBuf;

use clap::Args;
use common::vault::CreateRequest;

use crate::op::{default_path, describe, VaultOpError};

#[derive(Args, Debug, Clone)]
pub struct Add {
    /// File on disk to add
    pub source: PathBuf,

    /// Mirror path to store it at (defaults to the file name under the
    /// namespace directory)
    #[arg(long)]
    pub at: Option<PathBuf>,

    /// Seal and mirror the file without uploading it
    #[arg(long)]
    pub local_only: bool,

    /// Replace an existing file at the same mirror path
    #[arg(long)]
    pub overwrite: bool,
}

#[async_trait::async_trait]
impl crate::op::Op for Add {
    type Error = VaultOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (state, vault) = ctx.vault().await?;
        let data = tokio::fs::read(&self.source).await?;
        let at = match &self.at {
            Some(at) => at.clone(),
            None => {
                let name = self.source.file_name().ok_or_else(|| {
                    VaultOpError::InvalidArgument(format!(
                        "{} has no file name",
                        self.source.display()
                    ))
                })?;
                default_path(&state.config.default_type, &name.to_string_lossy())
            }
        };
        let name = at
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| VaultOpError::InvalidArgument(format!("{} has no file name", at.display())))?;

        let request = CreateRequest::new(name, state.config.default_type.clone(), data)
            .at(at)
            .overwrite(self.overwrite)
            .only_locally(self.local_only);
        let object = vault.create(request, &ctx.cancel).await?;
        Ok(describe(&object))
    }
}
