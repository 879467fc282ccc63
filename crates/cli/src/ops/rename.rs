use clap::Args;

use crate::op::{describe, resolve, VaultOpError};

#[derive(Args, Debug, Clone)]
pub struct Rename {
    /// Object to rename, by mirror path or meta hash
    pub target: String,

    /// New name (a single path component)
    pub name: String,
}

#[async_trait::async_trait]
impl crate::op::Op for Rename {
    type Error = VaultOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (_, vault) = ctx.vault().await?;
        let object = resolve(&vault, &self.target).await?;
        let renamed = vault
            .rename(&object.meta_hash, &self.name, &ctx.cancel)
            .await?;
        Ok(describe(&renamed))
    }
}
