use clap::Args;

use crate::op::{describe, resolve, VaultOpError};

#[derive(Args, Debug, Clone)]
pub struct Push {
    /// Local-only object to upload, by mirror path or meta hash
    pub target: String,

    /// Also upload every local-only descendant
    #[arg(long, short)]
    pub recursive: bool,
}

#[async_trait::async_trait]
impl crate::op::Op for Push {
    type Error = VaultOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (_, vault) = ctx.vault().await?;
        let object = resolve(&vault, &self.target).await?;
        let pushed = vault
            .push(&object.meta_hash, self.recursive, &ctx.cancel)
            .await?;
        Ok(describe(&pushed))
    }
}
