//! Attaching a volume by driving one of the FUSE tools.
//!
//! [`Mounter`] is selected by the volume's mounter kind:
//!
//! - geesefs runs as a host-supervised unit (see [`crate::supervisor`]),
//!   or in the foreground when systemd is out of reach or the volume asks
//!   for it with `--no-systemd`
//! - rclone daemonizes itself
//! - s3fs reads static keys from a password file
//!
//! Credentials reach the tool through the environment of that one child or
//! unit, never through the driver's own environment.

mod geesefs;
mod rclone;
mod s3fs;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::prelude::{CredentialResolver, MounterKind, StoreConfig, VolumeMeta};

use crate::config::{ConfigError, DriverConfig};
use crate::exec::{CommandRunner, ExecError, ExecSpec, TokioCommandRunner};
use crate::probe::{self, MountProbe, ProcMountInfo, WaitError};
use crate::staging::StagingError;
use crate::supervisor::{ServiceManagerConnector, ServiceManagerError, SystemdCli};

pub use geesefs::GeesefsMounter;
pub use rclone::RcloneMounter;
pub use s3fs::S3fsMounter;

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(
        "volume {volume_id} is already mounted on host, but in a different directory. \
         We want {requested}, but it's in {actual}"
    )]
    Conflict {
        volume_id: String,
        requested: String,
        actual: String,
    },

    #[error("timed out after {timeout:?} waiting for {target} to be mounted")]
    Timeout { target: String, timeout: Duration },

    #[error("failed to check whether {target} is mounted: {source}")]
    Probe {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    ServiceManager(#[from] ServiceManagerError),

    #[error("error starting systemd unit {unit} on host: {source}")]
    UnitStart {
        unit: String,
        #[source]
        source: ServiceManagerError,
    },

    #[error("failed to write credential file {path}: {source}")]
    CredentialFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Paths and limits the mounters need from the driver configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSettings {
    /// geesefs as the host sees it; units run this path
    pub host_geesefs: PathBuf,
    pub geesefs_source: PathBuf,
    pub geesefs_staged: PathBuf,
    pub passwd_file: PathBuf,
    pub mount_timeout: Duration,
}

impl MountSettings {
    pub fn from_config(config: &DriverConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            host_geesefs: config.host_geesefs(),
            geesefs_source: config.geesefs_source.clone(),
            geesefs_staged: config.geesefs_staged.clone(),
            passwd_file: config.passwd_file()?,
            mount_timeout: config.mount_timeout(),
        })
    }
}

/// Collaborators shared by every mount.
#[derive(Clone)]
pub struct MountContext {
    pub runner: Arc<dyn CommandRunner>,
    pub service_manager: Arc<dyn ServiceManagerConnector>,
    pub probe: Arc<dyn MountProbe>,
    pub resolver: CredentialResolver,
    pub settings: MountSettings,
}

impl std::fmt::Debug for MountContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountContext")
            .field("resolver", &self.resolver)
            .field("settings", &self.settings)
            .finish()
    }
}

impl MountContext {
    /// Real processes, host systemd and `/proc/self/mountinfo`.
    pub fn from_config(config: &DriverConfig) -> Result<Self, ConfigError> {
        let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner);
        Ok(Self {
            service_manager: Arc::new(SystemdCli::new(runner.clone())),
            runner,
            probe: Arc::new(ProcMountInfo::default()),
            resolver: CredentialResolver::default(),
            settings: MountSettings::from_config(config)?,
        })
    }

    async fn credentials_env(&self, config: &StoreConfig) -> BTreeMap<String, String> {
        self.resolver
            .resolve(
                &config.region,
                &config.access_key_id,
                &config.secret_access_key,
                &config.role_arn,
            )
            .await
            .to_env()
    }

    async fn wait_for_mount(&self, target: &str) -> Result<(), MountError> {
        let timeout = self.settings.mount_timeout;
        probe::wait_for_mount(self.probe.as_ref(), target, timeout)
            .await
            .map_err(|e| match e {
                WaitError::Timeout => MountError::Timeout {
                    target: target.to_string(),
                    timeout,
                },
                WaitError::Probe(source) => MountError::Probe {
                    target: target.to_string(),
                    source,
                },
            })
    }

    /// Run the tool in the foreground, then wait for the mount point.
    async fn fuse_mount(
        &self,
        program: &str,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        target: &str,
    ) -> Result<(), MountError> {
        let spec = ExecSpec::new(program).args(args).envs(env).inherit_stderr();
        tracing::info!(command = %spec.command_line(), "mounting fuse");
        self.runner.run(&spec).await?;
        self.wait_for_mount(target).await
    }
}

/// One volume bound to the tool that mounts it.
#[derive(Debug, Clone)]
pub enum Mounter {
    ServiceSupervised(GeesefsMounter),
    Daemonized(RcloneMounter),
    OptionFile(S3fsMounter),
}

impl Mounter {
    pub fn new(meta: VolumeMeta, config: StoreConfig, ctx: Arc<MountContext>) -> Self {
        match meta.mounter {
            MounterKind::Geesefs => Mounter::ServiceSupervised(GeesefsMounter::new(meta, config, ctx)),
            MounterKind::Rclone => Mounter::Daemonized(RcloneMounter::new(meta, config, ctx)),
            MounterKind::S3fs => Mounter::OptionFile(S3fsMounter::new(meta, config, ctx)),
        }
    }

    pub fn kind(&self) -> MounterKind {
        match self {
            Mounter::ServiceSupervised(_) => MounterKind::Geesefs,
            Mounter::Daemonized(_) => MounterKind::Rclone,
            Mounter::OptionFile(_) => MounterKind::S3fs,
        }
    }

    pub async fn mount(&self, target: &str, volume_id: &str) -> Result<(), MountError> {
        tracing::info!(volume_id, target, mounter = %self.kind(), "mounting volume");
        match self {
            Mounter::ServiceSupervised(m) => m.mount(target, volume_id).await,
            Mounter::Daemonized(m) => m.mount(target, volume_id).await,
            Mounter::OptionFile(m) => m.mount(target, volume_id).await,
        }
    }
}
