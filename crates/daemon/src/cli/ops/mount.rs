use std::sync::Arc;

use clap::Args;
use common::prelude::VolumeMeta;
use csi_s3_daemon::{ConfigError, MountContext, MountError, Mounter};

use super::secrets::{SecretArgs, SecretsError};

#[derive(Args, Debug, Clone)]
pub struct Mount {
    /// Volume id, also names the host unit
    #[arg(long)]
    pub volume_id: String,

    /// Directory to mount onto
    #[arg(long)]
    pub target: String,

    /// Volume context as JSON: {"Name":..,"Prefix":..,"Mounter":..,"MountOptions":[..]}
    #[arg(long)]
    pub volume_context: String,

    #[command(flatten)]
    pub secrets: SecretArgs,
}

#[derive(Debug, thiserror::Error)]
pub enum MountOpError {
    #[error(transparent)]
    VolumeContext(#[from] common::prelude::ConfigError),
    #[error(transparent)]
    Secrets(#[from] SecretsError),
    #[error(transparent)]
    Driver(#[from] ConfigError),
    #[error(transparent)]
    Mount(#[from] MountError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Mount {
    type Error = MountOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let meta = VolumeMeta::from_json(&self.volume_context)?;
        let store = self.secrets.store_config()?.with_mounter(meta.mounter);
        let mount_ctx = Arc::new(MountContext::from_config(&ctx.config)?);

        let mounter = Mounter::new(meta, store, mount_ctx);
        let kind = mounter.kind();
        mounter.mount(&self.target, &self.volume_id).await?;

        Ok(format!(
            "Mounted volume {} at {} with {}",
            self.volume_id, self.target, kind
        ))
    }
}
