//! In-process stand-ins for the host: processes, systemd, the mount table
//! and the credential sources. Used by the unit tests and the `tests/`
//! suites.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::credentials::{AmbientCredentials, TrustBroker};
use common::prelude::{CallerIdentity, CredentialError, CredentialResolver, ResolvedCredentials};
use parking_lot::Mutex;

use crate::exec::{CommandRunner, ExecError, ExecOutput, ExecSpec};
use crate::mounter::{MountContext, MountSettings};
use crate::probe::MountProbe;
use crate::supervisor::{
    MountUnit, ServiceManager, ServiceManagerConnector, ServiceManagerError, UnitProperties,
};

/// Records every invocation and answers with canned output.
///
/// A response registered with [`FakeRunner::respond`] applies to any command
/// line containing its needle; the most recent match wins. Everything else
/// exits 0 with no output.
#[derive(Default)]
pub struct FakeRunner {
    responses: Mutex<Vec<(String, ExecOutput)>>,
    calls: Mutex<Vec<ExecSpec>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, needle: impl Into<String>, output: ExecOutput) {
        self.responses.lock().push((needle.into(), output));
    }

    pub fn fail(&self, needle: impl Into<String>, status: i32, stderr: impl Into<String>) {
        self.respond(
            needle,
            ExecOutput {
                status: Some(status),
                stdout: String::new(),
                stderr: stderr.into(),
            },
        );
    }

    pub fn calls(&self) -> Vec<ExecSpec> {
        self.calls.lock().clone()
    }

    /// Calls whose program file name is `program`.
    pub fn calls_to(&self, program: &str) -> Vec<ExecSpec> {
        self.calls()
            .into_iter()
            .filter(|spec| {
                spec.program
                    .file_name()
                    .map(|name| name == program)
                    .unwrap_or(false)
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl CommandRunner for FakeRunner {
    async fn output(&self, spec: &ExecSpec) -> Result<ExecOutput, ExecError> {
        self.calls.lock().push(spec.clone());
        let line = spec.command_line();
        let response = self
            .responses
            .lock()
            .iter()
            .rev()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, output)| output.clone());
        Ok(response.unwrap_or(ExecOutput {
            status: Some(0),
            ..Default::default()
        }))
    }
}

/// Host service manager kept in memory.
///
/// Started units become `active` with their exec line, so a second start of
/// the same volume sees it running.
#[derive(Default)]
pub struct FakeServiceManager {
    units: Mutex<HashMap<String, UnitProperties>>,
    started: Mutex<Vec<MountUnit>>,
    /// Installed right before the next start, which then reports a clash
    racer: Mutex<Option<UnitProperties>>,
    fail_start: Mutex<Option<String>>,
    stops: AtomicUsize,
    resets: AtomicUsize,
}

impl FakeServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unit(self, name: impl Into<String>, properties: UnitProperties) -> Self {
        self.units.lock().insert(name.into(), properties);
        self
    }

    /// Make the next start lose a race against another caller that created
    /// `properties` under the same name.
    pub fn race_next_start(&self, properties: UnitProperties) {
        *self.racer.lock() = Some(properties);
    }

    pub fn fail_starts(&self, reason: impl Into<String>) {
        *self.fail_start.lock() = Some(reason.into());
    }

    pub fn unit(&self, name: &str) -> Option<UnitProperties> {
        self.units.lock().get(name).cloned()
    }

    pub fn started(&self) -> Vec<MountUnit> {
        self.started.lock().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

/// `loaded` unit in `active_state` running `exec`.
pub fn unit_properties(active_state: &str, exec: &[&str]) -> UnitProperties {
    UnitProperties {
        load_state: "loaded".to_string(),
        active_state: active_state.to_string(),
        exec_start: exec.iter().map(|arg| arg.to_string()).collect(),
    }
}

#[async_trait::async_trait]
impl ServiceManager for FakeServiceManager {
    async fn unit_properties(
        &self,
        name: &str,
    ) -> Result<Option<UnitProperties>, ServiceManagerError> {
        Ok(self.units.lock().get(name).cloned())
    }

    async fn start_transient_unit(&self, unit: &MountUnit) -> Result<(), ServiceManagerError> {
        if let Some(reason) = self.fail_start.lock().clone() {
            return Err(ServiceManagerError::Unavailable(reason));
        }
        if let Some(racer) = self.racer.lock().take() {
            self.units.lock().insert(unit.name.clone(), racer);
            return Err(ServiceManagerError::UnitExists(unit.name.clone()));
        }

        let mut units = self.units.lock();
        if units.get(&unit.name).is_some_and(|props| props.is_loaded()) {
            return Err(ServiceManagerError::UnitExists(unit.name.clone()));
        }
        units.insert(
            unit.name.clone(),
            UnitProperties {
                load_state: "loaded".to_string(),
                active_state: "active".to_string(),
                exec_start: unit.exec.clone(),
            },
        );
        self.started.lock().push(unit.clone());
        Ok(())
    }

    async fn stop_unit(&self, name: &str) -> Result<(), ServiceManagerError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(props) = self.units.lock().get_mut(name) {
            props.active_state = "failed".to_string();
        }
        Ok(())
    }

    async fn reset_failed_unit(&self, name: &str) -> Result<(), ServiceManagerError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        // collected once inactive or failed
        self.units.lock().remove(name);
        Ok(())
    }
}

/// Hands out a [`FakeServiceManager`], or fails as if systemd were missing.
#[derive(Default)]
pub struct FakeConnector {
    manager: Option<Arc<FakeServiceManager>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn available(manager: Arc<FakeServiceManager>) -> Self {
        Self {
            manager: Some(manager),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ServiceManagerConnector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn ServiceManager>, ServiceManagerError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match &self.manager {
            Some(manager) => Ok(manager.clone()),
            None => Err(ServiceManagerError::Unavailable(
                "no system bus in test".to_string(),
            )),
        }
    }
}

/// Mount table backed by a set of targets.
#[derive(Default)]
pub struct FakeProbe {
    everything: bool,
    mounted: Mutex<HashSet<String>>,
    checks: AtomicUsize,
}

impl FakeProbe {
    /// Nothing is ever mounted.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every target reads as mounted.
    pub fn everything_mounted() -> Self {
        Self {
            everything: true,
            ..Default::default()
        }
    }

    pub fn mount(&self, target: impl Into<String>) {
        self.mounted.lock().insert(target.into());
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MountProbe for FakeProbe {
    async fn is_mounted(&self, target: &str) -> std::io::Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.everything || self.mounted.lock().contains(target))
    }
}

/// Ambient chain with a fixed outcome.
#[derive(Default)]
pub struct FixedAmbient {
    credentials: Option<ResolvedCredentials>,
}

impl FixedAmbient {
    pub fn new(credentials: ResolvedCredentials) -> Self {
        Self {
            credentials: Some(credentials),
        }
    }

    pub fn missing() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AmbientCredentials for FixedAmbient {
    async fn load(&self, _region: &str) -> Result<ResolvedCredentials, CredentialError> {
        self.credentials
            .clone()
            .ok_or_else(|| CredentialError::NoAmbient("nothing configured in test".to_string()))
    }
}

/// Trust broker that grants every role the same session.
#[derive(Default)]
pub struct FixedBroker {
    sessions: Mutex<Vec<String>>,
}

pub const ASSUMED_ACCESS_KEY_ID: &str = "ASIAFAKESESSION";
pub const ASSUMED_SECRET_ACCESS_KEY: &str = "assumed-secret";
pub const ASSUMED_SESSION_TOKEN: &str = "assumed-token";

impl FixedBroker {
    /// Session names of every assume-role call.
    pub fn sessions(&self) -> Vec<String> {
        self.sessions.lock().clone()
    }
}

#[async_trait::async_trait]
impl TrustBroker for FixedBroker {
    async fn assume_role(
        &self,
        _region: &str,
        _base: &ResolvedCredentials,
        _role_arn: &str,
        session_name: &str,
    ) -> Result<ResolvedCredentials, CredentialError> {
        self.sessions.lock().push(session_name.to_string());
        ResolvedCredentials::from_parts(
            Some(ASSUMED_ACCESS_KEY_ID.to_string()),
            Some(ASSUMED_SECRET_ACCESS_KEY.to_string()),
            Some(ASSUMED_SESSION_TOKEN.to_string()),
        )
        .ok_or_else(|| CredentialError::Response("incomplete session".to_string()))
    }

    async fn caller_identity(
        &self,
        _region: &str,
        _credentials: &ResolvedCredentials,
    ) -> Result<CallerIdentity, CredentialError> {
        Ok(CallerIdentity {
            account: "000000000000".to_string(),
            arn: "arn:aws:sts::000000000000:assumed-role/test/session".to_string(),
            user_id: "AROATEST:session".to_string(),
        })
    }
}

/// A [`MountContext`] wired to fakes. Defaults: every command succeeds,
/// systemd is unavailable, every target is mounted, no ambient credentials.
pub struct MountContextBuilder {
    runner: Arc<dyn CommandRunner>,
    service_manager: Arc<dyn ServiceManagerConnector>,
    probe: Arc<dyn MountProbe>,
    resolver: CredentialResolver,
    settings: MountSettings,
}

impl Default for MountContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MountContextBuilder {
    pub fn new() -> Self {
        Self {
            runner: Arc::new(FakeRunner::new()),
            service_manager: Arc::new(FakeConnector::unavailable()),
            probe: Arc::new(FakeProbe::everything_mounted()),
            resolver: CredentialResolver::new(
                Arc::new(FixedAmbient::missing()),
                Arc::new(FixedBroker::default()),
            ),
            settings: MountSettings {
                host_geesefs: PathBuf::from("/var/lib/kubelet/plugins/ru.yandex.s3.csi/geesefs"),
                geesefs_source: PathBuf::from("/usr/bin/geesefs"),
                geesefs_staged: PathBuf::from("/csi/geesefs"),
                passwd_file: PathBuf::from("/tmp/.passwd-s3fs"),
                mount_timeout: Duration::from_secs(10),
            },
        }
    }

    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn service_manager(mut self, connector: Arc<dyn ServiceManagerConnector>) -> Self {
        self.service_manager = connector;
        self
    }

    pub fn probe(mut self, probe: Arc<dyn MountProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn resolver(mut self, resolver: CredentialResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn staging(mut self, source: impl Into<PathBuf>, staged: impl Into<PathBuf>) -> Self {
        self.settings.geesefs_source = source.into();
        self.settings.geesefs_staged = staged.into();
        self
    }

    pub fn passwd_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.passwd_file = path.into();
        self
    }

    pub fn build(self) -> Arc<MountContext> {
        Arc::new(MountContext {
            runner: self.runner,
            service_manager: self.service_manager,
            probe: self.probe,
            resolver: self.resolver,
            settings: self.settings,
        })
    }
}
