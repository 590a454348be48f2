use std::sync::Arc;

use common::prelude::{StoreConfig, VolumeMeta};

use crate::exec::ExecSpec;

use super::{MountContext, MountError};

const RCLONE: &str = "rclone";

/// rclone in `--daemon` mode. The tool forks once the mount is up, so a
/// clean exit is success and no polling follows.
#[derive(Debug, Clone)]
pub struct RcloneMounter {
    meta: VolumeMeta,
    config: StoreConfig,
    ctx: Arc<MountContext>,
}

impl RcloneMounter {
    pub fn new(meta: VolumeMeta, config: StoreConfig, ctx: Arc<MountContext>) -> Self {
        Self { meta, config, ctx }
    }

    fn args(&self, target: &str) -> Vec<String> {
        let mut args = vec![
            "mount".to_string(),
            format!(":s3:{}", remote_path(&self.meta.bucket_name, &self.meta.prefix)),
            target.to_string(),
            "--daemon".to_string(),
            "--s3-provider=AWS".to_string(),
            "--s3-env-auth=true".to_string(),
            format!("--s3-endpoint={}", self.config.endpoint),
            "--allow-other".to_string(),
            "--vfs-cache-mode=writes".to_string(),
        ];
        if !self.config.region.is_empty() {
            args.push(format!("--s3-region={}", self.config.region));
        }
        args.extend(self.meta.mount_options.iter().cloned());
        args
    }

    pub async fn mount(&self, target: &str, volume_id: &str) -> Result<(), MountError> {
        let env = self.ctx.credentials_env(&self.config).await;
        let spec = ExecSpec::new(RCLONE)
            .args(self.args(target))
            .envs(env)
            .inherit_stderr();
        tracing::info!(volume_id, command = %spec.command_line(), "starting rclone");
        self.ctx.runner.run(&spec).await?;
        Ok(())
    }
}

/// `bucket/prefix` with empty segments dropped.
fn remote_path(bucket: &str, prefix: &str) -> String {
    bucket
        .split('/')
        .chain(prefix.split('/'))
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}
