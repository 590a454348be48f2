//! [`ServiceManager`] backed by the host's systemd, driven through
//! `systemctl` and `systemd-run`.
//!
//! The plugin container has the host's `/run/systemd` mounted, so both tools
//! talk to the host manager. The image must ship both binaries: if either is
//! missing, [`ServiceManagerConnector::connect`] reports systemd as
//! unavailable and geesefs runs directly, without a unit to outlive the
//! plugin. Secrets in the unit environment are handed to `systemd-run`
//! through its own environment and imported by name, which keeps them off
//! the command line.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::exec::{CommandRunner, ExecSpec};

use super::{MountUnit, ServiceManager, ServiceManagerConnector, ServiceManagerError, UnitProperties};

const SYSTEMD_RUNTIME_DIR: &str = "/run/systemd/system";

#[derive(Clone)]
pub struct SystemdCli {
    runner: Arc<dyn CommandRunner>,
    systemctl: PathBuf,
    systemd_run: PathBuf,
    runtime_dir: PathBuf,
}

impl std::fmt::Debug for SystemdCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemdCli")
            .field("systemctl", &self.systemctl)
            .field("systemd_run", &self.systemd_run)
            .field("runtime_dir", &self.runtime_dir)
            .finish()
    }
}

impl SystemdCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            systemctl: PathBuf::from("systemctl"),
            systemd_run: PathBuf::from("systemd-run"),
            runtime_dir: PathBuf::from(SYSTEMD_RUNTIME_DIR),
        }
    }

    /// Directory whose presence means systemd is the running init.
    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = dir.into();
        self
    }

    fn systemctl<I, S>(&self, args: I) -> ExecSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExecSpec::new(&self.systemctl).args(args)
    }

    fn start_spec(&self, unit: &MountUnit) -> ExecSpec {
        let mut spec = ExecSpec::new(&self.systemd_run)
            .arg(format!("--unit={}", unit.name))
            .arg(format!("--description={}", unit.description))
            .arg(format!("--property=CollectMode={}", unit.collect_mode.as_str()))
            .arg("--quiet");
        for name in unit.environment.keys() {
            spec = spec.arg(format!("--setenv={}", name));
        }
        spec.arg("--")
            .args(unit.exec.iter().cloned())
            .envs(unit.environment.clone())
    }
}

#[async_trait::async_trait]
impl ServiceManagerConnector for SystemdCli {
    async fn connect(&self) -> Result<Arc<dyn ServiceManager>, ServiceManagerError> {
        if !is_dir(&self.runtime_dir).await {
            return Err(ServiceManagerError::Unavailable(format!(
                "{} not found",
                self.runtime_dir.display()
            )));
        }
        self.runner
            .run(&self.systemctl(["show", "--property=Version"]))
            .await
            .map_err(|e| ServiceManagerError::Unavailable(e.to_string()))?;
        self.runner
            .run(&ExecSpec::new(&self.systemd_run).arg("--version"))
            .await
            .map_err(|e| ServiceManagerError::Unavailable(e.to_string()))?;
        Ok(Arc::new(self.clone()))
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

#[async_trait::async_trait]
impl ServiceManager for SystemdCli {
    async fn unit_properties(
        &self,
        name: &str,
    ) -> Result<Option<UnitProperties>, ServiceManagerError> {
        let output = self
            .runner
            .run(&self.systemctl([
                "show",
                name,
                "--property=LoadState",
                "--property=ActiveState",
                "--property=ExecStart",
            ]))
            .await?;
        let properties = parse_show(&output.stdout)?;
        Ok(properties.is_loaded().then_some(properties))
    }

    async fn start_transient_unit(&self, unit: &MountUnit) -> Result<(), ServiceManagerError> {
        let spec = self.start_spec(unit);
        let output = self.runner.output(&spec).await?;
        if !output.success()
            && (output.stderr.contains("already exists") || output.stderr.contains("already loaded"))
        {
            return Err(ServiceManagerError::UnitExists(unit.name.clone()));
        }
        output.check(&spec)?;
        Ok(())
    }

    async fn stop_unit(&self, name: &str) -> Result<(), ServiceManagerError> {
        self.runner.run(&self.systemctl(["stop", name])).await?;
        Ok(())
    }

    async fn reset_failed_unit(&self, name: &str) -> Result<(), ServiceManagerError> {
        self.runner
            .run(&self.systemctl(["reset-failed", name]))
            .await?;
        Ok(())
    }
}

/// Parse `systemctl show` output (`Key=Value` lines).
pub fn parse_show(stdout: &str) -> Result<UnitProperties, ServiceManagerError> {
    let fields: HashMap<&str, &str> = stdout
        .lines()
        .filter_map(|line| line.split_once('='))
        .collect();

    let load_state = fields
        .get("LoadState")
        .ok_or_else(|| ServiceManagerError::Parse(format!("no LoadState in {:?}", stdout)))?;

    Ok(UnitProperties {
        load_state: load_state.to_string(),
        active_state: fields.get("ActiveState").unwrap_or(&"").to_string(),
        exec_start: fields
            .get("ExecStart")
            .map(|value| parse_exec_start(value))
            .unwrap_or_default(),
    })
}

/// `{ path=/bin/x ; argv[]=/bin/x -f /mnt ; ignore_errors=no ; ... }` to
/// `["/bin/x", "-f", "/mnt"]`. Arguments containing spaces are not
/// recoverable from this format.
fn parse_exec_start(value: &str) -> Vec<String> {
    let Some(start) = value.find("argv[]=") else {
        return Vec::new();
    };
    let rest = &value[start + "argv[]=".len()..];
    let argv = match rest.find(" ;") {
        Some(end) => &rest[..end],
        None => rest.trim_end_matches('}'),
    };
    argv.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ExecOutput;
    use crate::supervisor::CollectMode;
    use crate::testkit::FakeRunner;
    use std::collections::BTreeMap;

    const SHOW_ACTIVE: &str = "\
LoadState=loaded
ActiveState=active
ExecStart={ path=/var/lib/kubelet/plugins/ru.yandex.s3.csi/geesefs ; argv[]=/var/lib/kubelet/plugins/ru.yandex.s3.csi/geesefs -f -o allow_other --endpoint https://storage.yandexcloud.net volumes:pvc-1 /mnt/target ; ignore_errors=no ; start_time=[n/a] ; stop_time=[n/a] ; pid=0 ; code=(null) ; status=0/0 }
";

    fn unit() -> MountUnit {
        let mut environment = BTreeMap::new();
        environment.insert("AWS_ACCESS_KEY_ID".to_string(), "AKIA".to_string());
        environment.insert("AWS_SECRET_ACCESS_KEY".to_string(), "secret".to_string());
        MountUnit {
            name: "geesefs-pvc_2d1.service".to_string(),
            description: "GeeseFS mount for Kubernetes volume pvc-1".to_string(),
            exec: vec!["/plugin/geesefs".to_string(), "-f".to_string(), "/mnt/t".to_string()],
            environment,
            collect_mode: CollectMode::InactiveOrFailed,
        }
    }

    #[test]
    fn test_parse_show() {
        let props = parse_show(SHOW_ACTIVE).unwrap();
        assert!(props.is_loaded());
        assert!(props.is_running());
        assert_eq!(props.target(), Some("/mnt/target"));
        assert_eq!(props.exec_start.len(), 8);
    }

    #[test]
    fn test_parse_show_not_found() {
        let props = parse_show("LoadState=not-found\nActiveState=inactive\nExecStart=\n").unwrap();
        assert!(!props.is_loaded());
        assert!(props.exec_start.is_empty());
        assert!(parse_show("garbage").is_err());
    }

    #[tokio::test]
    async fn test_missing_unit_is_none() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond(
            "systemctl show",
            ExecOutput {
                status: Some(0),
                stdout: "LoadState=not-found\nActiveState=inactive\nExecStart=\n".to_string(),
                stderr: String::new(),
            },
        );
        let systemd = SystemdCli::new(runner.clone());
        assert_eq!(systemd.unit_properties("x.service").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_start_keeps_secrets_off_argv() {
        let runner = Arc::new(FakeRunner::new());
        let systemd = SystemdCli::new(runner.clone());
        systemd.start_transient_unit(&unit()).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        let spec = &calls[0];
        assert_eq!(spec.program, PathBuf::from("systemd-run"));
        assert_eq!(
            spec.args,
            vec![
                "--unit=geesefs-pvc_2d1.service",
                "--description=GeeseFS mount for Kubernetes volume pvc-1",
                "--property=CollectMode=inactive-or-failed",
                "--quiet",
                "--setenv=AWS_ACCESS_KEY_ID",
                "--setenv=AWS_SECRET_ACCESS_KEY",
                "--",
                "/plugin/geesefs",
                "-f",
                "/mnt/t",
            ]
        );
        assert!(!spec.command_line().contains("secret"));
        assert_eq!(spec.env.get("AWS_SECRET_ACCESS_KEY").map(String::as_str), Some("secret"));
    }

    #[tokio::test]
    async fn test_start_maps_existing_unit() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond(
            "systemd-run",
            ExecOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: "Failed to start transient service unit: Unit geesefs-pvc_2d1.service already exists.".to_string(),
            },
        );
        let systemd = SystemdCli::new(runner.clone());
        let err = systemd.start_transient_unit(&unit()).await.unwrap_err();
        assert!(matches!(err, ServiceManagerError::UnitExists(_)));
    }

    #[tokio::test]
    async fn test_connect_requires_runtime_dir() {
        let runner = Arc::new(FakeRunner::new());
        let systemd = SystemdCli::new(runner.clone()).with_runtime_dir("/nonexistent/systemd");
        assert!(matches!(
            systemd.connect().await,
            Err(ServiceManagerError::Unavailable(_))
        ));
        assert!(runner.calls().is_empty());

        let dir = tempfile::tempdir().unwrap();
        let systemd = SystemdCli::new(runner.clone()).with_runtime_dir(dir.path());
        assert!(systemd.connect().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_requires_systemd_run() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail("systemd-run", 127, "systemd-run: command not found");
        let dir = tempfile::tempdir().unwrap();
        let systemd = SystemdCli::new(runner.clone()).with_runtime_dir(dir.path());

        let err = systemd.connect().await.err().unwrap();
        assert!(matches!(err, ServiceManagerError::Unavailable(_)));
        assert!(err.to_string().contains("systemd-run"));
        assert_eq!(runner.calls_to("systemctl").len(), 1);
    }
}
