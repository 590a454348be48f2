use clap::{Args, Subcommand};

use super::bucket::BucketOpError;
use super::secrets::SecretArgs;
use crate::cli::op::{Op, OpContext};

crate::command_enum! {
    (Create, Create),
    (Remove, Remove),
}

pub type PrefixCommand = Command;

/// Volumes that share one bucket, one prefix each
#[derive(Args, Debug, Clone)]
pub struct Prefix {
    #[command(subcommand)]
    pub command: PrefixCommand,
}

#[async_trait::async_trait]
impl Op for Prefix {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}

/// Put the directory marker for a prefix
#[derive(Args, Debug, Clone)]
pub struct Create {
    pub bucket: String,
    pub prefix: String,

    #[command(flatten)]
    pub secrets: SecretArgs,
}

#[async_trait::async_trait]
impl Op for Create {
    type Error = BucketOpError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let client = ctx.bucket_client(self.secrets.store_config()?).await?;
        client.create_prefix(&self.bucket, &self.prefix).await?;
        Ok(format!("Created prefix {}/{}", self.bucket, self.prefix))
    }
}

/// Delete everything under a prefix, then its marker
#[derive(Args, Debug, Clone)]
pub struct Remove {
    pub bucket: String,
    pub prefix: String,

    #[command(flatten)]
    pub secrets: SecretArgs,
}

#[async_trait::async_trait]
impl Op for Remove {
    type Error = BucketOpError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let client = ctx.bucket_client(self.secrets.store_config()?).await?;
        client.remove_prefix(&self.bucket, &self.prefix).await?;
        Ok(format!("Removed prefix {}/{}", self.bucket, self.prefix))
    }
}
