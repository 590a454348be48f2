use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use common::prelude::{StoreConfig, VolumeMeta};
use tokio::io::AsyncWriteExt;

use super::{MountContext, MountError};

const S3FS: &str = "s3fs";

/// s3fs. Static keys go through its password file; without keys it asks
/// the instance metadata for a role.
#[derive(Debug, Clone)]
pub struct S3fsMounter {
    meta: VolumeMeta,
    config: StoreConfig,
    ctx: Arc<MountContext>,
}

impl S3fsMounter {
    pub fn new(meta: VolumeMeta, config: StoreConfig, ctx: Arc<MountContext>) -> Self {
        Self { meta, config, ctx }
    }

    fn uses_role(&self) -> bool {
        !self.config.has_static_keys()
    }

    fn args(&self, target: &str) -> Vec<String> {
        let mut args = vec![
            format!("{}:/{}", self.meta.bucket_name, self.meta.prefix),
            target.to_string(),
        ];
        let mut option = |value: String| {
            args.push("-o".to_string());
            args.push(value);
        };
        option("allow_other".to_string());
        option("mp_umask=000".to_string());

        if self.uses_role() {
            let role = match self.config.role_arn.as_str() {
                "" => "auto",
                arn => arn,
            };
            option(format!("iam_role={}", role));
            if !self.config.endpoint.is_empty() {
                option(format!("url={}", self.config.endpoint));
            }
        } else {
            option(format!(
                "passwd_file={}",
                self.ctx.settings.passwd_file.display()
            ));
            option("use_path_request_style".to_string());
            option(format!("url={}", self.config.endpoint));
        }
        if !self.config.region.is_empty() {
            option(format!("endpoint={}", self.config.region));
        }

        args.extend(self.meta.mount_options.iter().cloned());
        args
    }

    pub async fn mount(&self, target: &str, volume_id: &str) -> Result<(), MountError> {
        if !self.uses_role() {
            let content = format!(
                "{}:{}",
                self.config.access_key_id, self.config.secret_access_key
            );
            write_passwd_file(&self.ctx.settings.passwd_file, &content).await?;
        }
        tracing::info!(volume_id, role = self.uses_role(), "mounting with s3fs");
        self.ctx
            .fuse_mount(S3FS, self.args(target), Default::default(), target)
            .await
    }
}

/// Owner-only, replacing whatever a previous volume left there.
async fn write_passwd_file(path: &Path, content: &str) -> Result<(), MountError> {
    let to_error = |source: std::io::Error| MountError::CredentialFile {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .await
        .map_err(to_error)?;
    // mode() only applies on creation
    file.set_permissions(Permissions::from_mode(0o600))
        .await
        .map_err(to_error)?;
    file.write_all(content.as_bytes()).await.map_err(to_error)?;
    file.flush().await.map_err(to_error)?;
    Ok(())
}
