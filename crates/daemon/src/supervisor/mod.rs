//! Host-supervised mount processes.
//!
//! A FUSE process started from inside the plugin container dies with the
//! container. Running it as a transient unit of the host service manager
//! keeps it alive across plugin restarts. One unit per volume id; the unit
//! name is derived from the id, so the service manager is what guarantees at
//! most one mount process per volume.
//!
//! Per volume the supervisor distinguishes four states:
//!
//! - **absent**: start a new unit
//! - **active at the requested target**: nothing to do
//! - **active at another target**: [`MountError::Conflict`], never reconciled
//! - **inactive or failed**: stop, reset the failure record, start fresh
//!
//! Query and start are separate calls, so two callers racing on the same
//! volume can both see "absent". Starting a unit whose name is taken fails
//! on the host side; the supervisor then re-reads the unit once and
//! classifies again instead of reporting the collision.

pub mod systemd;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::exec::ExecError;
use crate::mounter::MountError;

pub use systemd::SystemdCli;

/// Garbage collection policy for a transient unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectMode {
    /// Unload once inactive
    Inactive,
    /// Unload once inactive or failed, so failed mounts leave nothing behind
    #[default]
    InactiveOrFailed,
}

impl CollectMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectMode::Inactive => "inactive",
            CollectMode::InactiveOrFailed => "inactive-or-failed",
        }
    }
}

/// Everything needed to start the mount process of one volume.
#[derive(Clone, PartialEq, Eq)]
pub struct MountUnit {
    pub name: String,
    pub description: String,
    /// Program followed by its arguments; the target is the last element
    pub exec: Vec<String>,
    /// Unit-scoped environment
    pub environment: BTreeMap<String, String>,
    pub collect_mode: CollectMode,
}

impl std::fmt::Debug for MountUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountUnit")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("exec", &self.exec)
            .field("environment", &self.environment.keys().collect::<Vec<_>>())
            .field("collect_mode", &self.collect_mode)
            .finish()
    }
}

impl MountUnit {
    pub fn target(&self) -> Option<&str> {
        self.exec.last().map(String::as_str)
    }
}

/// Unit name for a volume: `<tool>-<escaped id>.service`.
pub fn unit_name(tool: &str, volume_id: &str) -> String {
    format!("{}-{}.service", tool, escape_unit_name(volume_id))
}

/// Bus-path escaping: ASCII alphanumerics stay, every other byte becomes
/// `_` followed by two lowercase hex digits. Empty input becomes `_`.
pub fn escape_unit_name(raw: &str) -> String {
    if raw.is_empty() {
        return "_".to_string();
    }
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02x}", byte));
        }
    }
    out
}

/// What the service manager reports about a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitProperties {
    pub load_state: String,
    pub active_state: String,
    /// argv of the first ExecStart entry
    pub exec_start: Vec<String>,
}

impl UnitProperties {
    pub fn is_loaded(&self) -> bool {
        !matches!(self.load_state.as_str(), "" | "not-found")
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.active_state.as_str(),
            "active" | "activating" | "reloading"
        )
    }

    pub fn target(&self) -> Option<&str> {
        self.exec_start.last().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitState {
    Absent,
    ActiveAtTarget,
    ActiveElsewhere { actual: String },
    InactiveOrFailed,
}

impl UnitState {
    pub fn classify(properties: Option<&UnitProperties>, target: &str) -> Self {
        match properties {
            None => UnitState::Absent,
            Some(props) if !props.is_loaded() => UnitState::Absent,
            Some(props) if props.is_running() => match props.target() {
                Some(actual) if actual == target => UnitState::ActiveAtTarget,
                actual => UnitState::ActiveElsewhere {
                    actual: actual.unwrap_or_default().to_string(),
                },
            },
            Some(_) => UnitState::InactiveOrFailed,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceManagerError {
    #[error("service manager unavailable: {0}")]
    Unavailable(String),

    #[error("unit {0} already exists")]
    UnitExists(String),

    #[error("service manager call failed: {0}")]
    Command(#[from] ExecError),

    #[error("unexpected service manager output: {0}")]
    Parse(String),
}

/// The four host calls the supervisor needs.
#[async_trait::async_trait]
pub trait ServiceManager: Send + Sync {
    /// `None` when the unit is unknown to the service manager.
    async fn unit_properties(
        &self,
        name: &str,
    ) -> Result<Option<UnitProperties>, ServiceManagerError>;

    /// Fails with [`ServiceManagerError::UnitExists`] when the name is taken.
    async fn start_transient_unit(&self, unit: &MountUnit) -> Result<(), ServiceManagerError>;

    async fn stop_unit(&self, name: &str) -> Result<(), ServiceManagerError>;

    async fn reset_failed_unit(&self, name: &str) -> Result<(), ServiceManagerError>;
}

/// Opens a session with the host service manager.
#[async_trait::async_trait]
pub trait ServiceManagerConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ServiceManager>, ServiceManagerError>;
}

/// What [`MountSupervisor::ensure`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// A unit for the same target was already running
    AlreadyMounted,
    Started,
    /// A dead unit was cleared away first
    Restarted,
}

#[derive(Clone)]
pub struct MountSupervisor {
    manager: Arc<dyn ServiceManager>,
}

impl MountSupervisor {
    pub fn new(manager: Arc<dyn ServiceManager>) -> Self {
        Self { manager }
    }

    /// Bring the unit of `volume_id` to "running at `target`".
    pub async fn ensure(
        &self,
        unit: &MountUnit,
        volume_id: &str,
        target: &str,
    ) -> Result<Reconciled, MountError> {
        let properties = self.manager.unit_properties(&unit.name).await?;
        let restarted = match UnitState::classify(properties.as_ref(), target) {
            UnitState::ActiveAtTarget => {
                tracing::info!(volume_id, unit = %unit.name, target, "already mounted");
                return Ok(Reconciled::AlreadyMounted);
            }
            UnitState::ActiveElsewhere { actual } => {
                return Err(conflict(volume_id, target, actual));
            }
            UnitState::InactiveOrFailed => {
                let active_state = properties
                    .as_ref()
                    .map(|p| p.active_state.as_str())
                    .unwrap_or_default();
                tracing::info!(volume_id, unit = %unit.name, active_state, "clearing dead unit");
                // auto-collection normally does this; failures here surface on start
                if let Err(e) = self.manager.stop_unit(&unit.name).await {
                    tracing::debug!(unit = %unit.name, "stop failed: {}", e);
                }
                if let Err(e) = self.manager.reset_failed_unit(&unit.name).await {
                    tracing::debug!(unit = %unit.name, "reset-failed failed: {}", e);
                }
                true
            }
            UnitState::Absent => false,
        };

        match self.manager.start_transient_unit(unit).await {
            Ok(()) => {
                tracing::info!(volume_id, unit = %unit.name, target, "started mount unit");
                Ok(if restarted {
                    Reconciled::Restarted
                } else {
                    Reconciled::Started
                })
            }
            Err(ServiceManagerError::UnitExists(name)) => {
                tracing::warn!(volume_id, unit = %name, "unit appeared concurrently, re-checking");
                let properties = self.manager.unit_properties(&unit.name).await?;
                match UnitState::classify(properties.as_ref(), target) {
                    UnitState::ActiveAtTarget => Ok(Reconciled::AlreadyMounted),
                    UnitState::ActiveElsewhere { actual } => {
                        Err(conflict(volume_id, target, actual))
                    }
                    _ => Err(MountError::UnitStart {
                        unit: unit.name.clone(),
                        source: ServiceManagerError::UnitExists(name),
                    }),
                }
            }
            Err(source) => Err(MountError::UnitStart {
                unit: unit.name.clone(),
                source,
            }),
        }
    }
}

fn conflict(volume_id: &str, requested: &str, actual: String) -> MountError {
    tracing::error!(volume_id, requested, actual = %actual, "volume mounted elsewhere");
    MountError::Conflict {
        volume_id: volume_id.to_string(),
        requested: requested.to_string(),
        actual,
    }
}
