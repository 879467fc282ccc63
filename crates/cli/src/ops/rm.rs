use clap::Args;

use crate::op::{describe, resolve, VaultOpError};

#[derive(Args, Debug, Clone)]
pub struct Rm {
    /// Object to delete, by mirror path or meta hash
    pub target: String,

    /// Only drop the local copy, keeping the object on the backend
    #[arg(long)]
    pub local: bool,

    /// With --local, drop the local copy even when it is the only one
    #[arg(long, requires = "local")]
    pub force: bool,
}

#[async_trait::async_trait]
impl crate::op::Op for Rm {
    type Error = VaultOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (_, vault) = ctx.vault().await?;
        let object = resolve(&vault, &self.target).await?;
        let survivor = vault
            .delete(&object.meta_hash, self.local, self.force, &ctx.cancel)
            .await?;
        Ok(match survivor {
            Some(row) => describe(&row),
            None => format!("deleted {}", object.meta_hash),
        })
    }
}
