use std::sync::Arc;

use common::prelude::{StoreConfig, VolumeMeta};
use common::volume::NO_SYSTEMD_OPTION;

use crate::staging::stage_binary;
use crate::supervisor::{unit_name, CollectMode, MountSupervisor, MountUnit, Reconciled};

use super::{MountContext, MountError};

const GEESEFS: &str = "geesefs";
/// nobody / nogroup
const UNPRIVILEGED_ID: &str = "65534";

/// GeeseFS, started as a transient host unit so the mount outlives the
/// plugin container.
#[derive(Debug, Clone)]
pub struct GeesefsMounter {
    meta: VolumeMeta,
    config: StoreConfig,
    ctx: Arc<MountContext>,
}

impl GeesefsMounter {
    pub fn new(meta: VolumeMeta, config: StoreConfig, ctx: Arc<MountContext>) -> Self {
        Self { meta, config, ctx }
    }

    /// Tool arguments shared by both launch paths, and whether the volume
    /// opted out of supervision.
    fn args(&self, target: &str) -> (Vec<String>, bool) {
        let mut args = Vec::new();
        if !self.config.region.is_empty() {
            args.push("--region".to_string());
            args.push(self.config.region.clone());
        }
        args.extend(
            ["--setuid", UNPRIVILEGED_ID, "--setgid", UNPRIVILEGED_ID]
                .into_iter()
                .map(String::from),
        );

        let mut supervised = true;
        for option in &self.meta.mount_options {
            if option == NO_SYSTEMD_OPTION {
                supervised = false;
            } else {
                args.push(option.clone());
            }
        }

        args.push(format!("{}:{}", self.meta.bucket_name, self.meta.prefix));
        args.push(target.to_string());
        (args, supervised)
    }

    pub async fn mount(&self, target: &str, volume_id: &str) -> Result<(), MountError> {
        let (args, supervised) = self.args(target);
        if !supervised {
            return self.mount_direct(target, args).await;
        }

        let manager = match self.ctx.service_manager.connect().await {
            Ok(manager) => manager,
            Err(e) => {
                tracing::error!(
                    volume_id,
                    "failed to connect to systemd: {}, starting geesefs directly",
                    e
                );
                return self.mount_direct(target, args).await;
            }
        };

        let settings = &self.ctx.settings;
        stage_binary(&settings.geesefs_source, &settings.geesefs_staged).await?;

        let mut exec = vec![
            settings.host_geesefs.display().to_string(),
            "-f".to_string(),
            "-o".to_string(),
            "allow_other".to_string(),
            "--endpoint".to_string(),
            self.config.endpoint.clone(),
        ];
        exec.extend(args);

        let unit = MountUnit {
            name: unit_name(GEESEFS, volume_id),
            description: format!("GeeseFS mount for Kubernetes volume {}", volume_id),
            exec,
            environment: self.ctx.credentials_env(&self.config).await,
            collect_mode: CollectMode::InactiveOrFailed,
        };

        match MountSupervisor::new(manager)
            .ensure(&unit, volume_id, target)
            .await?
        {
            Reconciled::AlreadyMounted => Ok(()),
            Reconciled::Started | Reconciled::Restarted => self.ctx.wait_for_mount(target).await,
        }
    }

    async fn mount_direct(&self, target: &str, args: Vec<String>) -> Result<(), MountError> {
        let mut full = vec![
            "--endpoint".to_string(),
            self.config.endpoint.clone(),
            "-o".to_string(),
            "allow_other".to_string(),
            "--log-file".to_string(),
            "/dev/stderr".to_string(),
        ];
        full.extend(args);
        let env = self.ctx.credentials_env(&self.config).await;
        self.ctx.fuse_mount(GEESEFS, full, env, target).await
    }
}
