use std::path::PathBuf;

use clap::Args;

use crate::op::{describe, resolve, VaultOpError};

#[derive(Args, Debug, Clone)]
pub struct Update {
    /// Object to update, by mirror path or meta hash
    pub target: String,

    /// File on disk holding the new content
    pub source: PathBuf,
}

#[async_trait::async_trait]
impl crate::op::Op for Update {
    type Error = VaultOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (_, vault) = ctx.vault().await?;
        let object = resolve(&vault, &self.target).await?;
        let data = tokio::fs::read(&self.source).await?;
        let updated = vault
            .update_content(&object.meta_hash, data, &ctx.cancel)
            .await?;
        Ok(describe(&updated))
    }
}
