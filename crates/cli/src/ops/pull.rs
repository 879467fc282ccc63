use clap::Args;

use crate::op::{describe, resolve, VaultOpError};

#[derive(Args, Debug, Clone)]
pub struct Pull {
    /// Object to fetch into the mirror, by mirror path or meta hash
    pub target: String,

    /// Also fetch every descendant, importing unknown children
    #[arg(long, short)]
    pub recursive: bool,
}

#[async_trait::async_trait]
impl crate::op::Op for Pull {
    type Error = VaultOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (_, vault) = ctx.vault().await?;
        let object = resolve(&vault, &self.target).await?;
        let pulled = vault
            .pull(&object.meta_hash, self.recursive, &ctx.cancel)
            .await?;
        Ok(describe(&pulled))
    }
}
