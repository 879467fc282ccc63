use std::path::PathBuf;

use clap::Args;
use common::vault::CreateRequest;

use crate::op::{describe, VaultOpError};

#[derive(Args, Debug, Clone)]
pub struct Mkdir {
    /// Mirror path of the new directory
    pub path: PathBuf,
}

#[async_trait::async_trait]
impl crate::op::Op for Mkdir {
    type Error = VaultOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (state, vault) = ctx.vault().await?;
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                VaultOpError::InvalidArgument(format!("{} has no name", self.path.display()))
            })?;
        let request =
            CreateRequest::directory(name, state.config.default_type.clone()).at(self.path.clone());
        let object = vault.create(request, &ctx.cancel).await?;
        Ok(describe(&object))
    }
}
