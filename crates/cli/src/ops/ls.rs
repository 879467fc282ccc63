use clap::Args;

use crate::op::{describe, resolve, VaultOpError};

#[derive(Args, Debug, Clone)]
pub struct Ls {
    /// Directory to list, by mirror path or meta hash (defaults to the
    /// namespace directory)
    pub target: Option<String>,

    /// List every known object instead of one directory
    #[arg(long)]
    pub all: bool,
}

#[async_trait::async_trait]
impl crate::op::Op for Ls {
    type Error = VaultOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (state, vault) = ctx.vault().await?;

        let objects = if self.all {
            vault.list().await?
        } else {
            let target = match &self.target {
                Some(target) => target.clone(),
                None => state
                    .config
                    .default_type
                    .root_path()
                    .to_string_lossy()
                    .into_owned(),
            };
            let dir = resolve(&vault, &target).await?;
            let mut children = Vec::with_capacity(dir.children().len());
            for child in dir.children() {
                match vault.get(&child.meta_hash).await {
                    Ok(row) => children.push(row),
                    Err(_) => tracing::debug!(meta_hash = %child.meta_hash, "child not imported"),
                }
            }
            children
        };

        if objects.is_empty() {
            return Ok("No items found".to_string());
        }
        Ok(objects.iter().map(describe).collect::<Vec<_>>().join("\n"))
    }
}
