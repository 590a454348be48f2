use clap::{Args, Subcommand};

use bucket::BucketError;

use super::secrets::{SecretArgs, SecretsError};
use crate::cli::op::{Op, OpContext};

crate::command_enum! {
    (Create, Create),
    (Remove, Remove),
    (Exists, Exists),
}

pub type BucketCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Bucket {
    #[command(subcommand)]
    pub command: BucketCommand,
}

#[async_trait::async_trait]
impl Op for Bucket {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BucketOpError {
    #[error(transparent)]
    Secrets(#[from] SecretsError),
    #[error(transparent)]
    Bucket(#[from] BucketError),
}

/// Create a bucket in the configured region
#[derive(Args, Debug, Clone)]
pub struct Create {
    pub name: String,

    #[command(flatten)]
    pub secrets: SecretArgs,
}

#[async_trait::async_trait]
impl Op for Create {
    type Error = BucketOpError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let client = ctx.bucket_client(self.secrets.store_config()?).await?;
        client.create_bucket(&self.name).await?;
        Ok(format!("Created bucket {}", self.name))
    }
}

/// Empty a bucket and delete it
#[derive(Args, Debug, Clone)]
pub struct Remove {
    pub name: String,

    #[command(flatten)]
    pub secrets: SecretArgs,
}

#[async_trait::async_trait]
impl Op for Remove {
    type Error = BucketOpError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let client = ctx.bucket_client(self.secrets.store_config()?).await?;
        client.remove_bucket(&self.name).await?;
        Ok(format!("Removed bucket {}", self.name))
    }
}

#[derive(Args, Debug, Clone)]
pub struct Exists {
    pub name: String,

    #[command(flatten)]
    pub secrets: SecretArgs,
}

#[async_trait::async_trait]
impl Op for Exists {
    type Error = BucketOpError;
    type Output = bool;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let client = ctx.bucket_client(self.secrets.store_config()?).await?;
        Ok(client.bucket_exists(&self.name).await?)
    }
}
