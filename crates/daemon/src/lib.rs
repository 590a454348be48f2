// Host-side plumbing
pub mod exec;
pub mod probe;
pub mod staging;

// Mounting
pub mod mounter;
pub mod supervisor;

// Driver settings, logging, build metadata
pub mod build_info;
pub mod config;
pub mod process;

pub mod testkit;

pub use config::{ConfigError, DriverConfig};
pub use mounter::{MountContext, MountError, MountSettings, Mounter};
pub use supervisor::{MountSupervisor, Reconciled};
