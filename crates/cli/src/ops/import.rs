use clap::Args;
use common::crypto::Iv;
use common::hash::ObjectHash;

use crate::op::{describe, VaultOpError};

#[derive(Args, Debug, Clone)]
pub struct Import {
    /// Meta hash of the object to register
    pub meta_hash: String,

    /// Hex nonce its meta blob was sealed with
    pub meta_iv: String,

    /// Also register every descendant
    #[arg(long, short)]
    pub recursive: bool,
}

#[async_trait::async_trait]
impl crate::op::Op for Import {
    type Error = VaultOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let meta_hash = ObjectHash::parse(&self.meta_hash)
            .map_err(|e| VaultOpError::InvalidArgument(e.to_string()))?;
        let meta_iv = Iv::from_hex(&self.meta_iv)
            .map_err(|e| VaultOpError::InvalidArgument(e.to_string()))?;

        let (_, vault) = ctx.vault().await?;
        let object = vault.import(&meta_hash, &meta_iv, self.recursive).await?;
        Ok(describe(&object))
    }
}
