use clap::Args;

use crate::op::{resolve, VaultOpError};

#[derive(Args, Debug, Clone)]
pub struct Cat {
    /// Object to read, by mirror path or meta hash
    pub target: String,
}

#[async_trait::async_trait]
impl crate::op::Op for Cat {
    type Error = VaultOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (_, vault) = ctx.vault().await?;
        let object = resolve(&vault, &self.target).await?;
        let data = vault.read(&object.meta_hash).await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }
}
