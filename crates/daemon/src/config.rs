use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use bucket::EraserConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PLUGIN_DIR: &str = "/var/lib/kubelet/plugins/ru.yandex.s3.csi";
pub const PLUGIN_DIR_ENV: &str = "PLUGIN_DIR";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/csi-s3/config.toml";
pub const PASSWD_FILE_NAME: &str = ".passwd-s3fs";

/// Driver-wide settings. Every field has a default, so an empty file (or
/// no file at all) is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Host-visible plugin directory; the staged geesefs is run from here
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: PathBuf,
    /// geesefs as shipped in the image
    #[serde(default = "default_geesefs_source")]
    pub geesefs_source: PathBuf,
    /// Where the image sees the plugin directory
    #[serde(default = "default_geesefs_staged")]
    pub geesefs_staged: PathBuf,
    /// s3fs credential file, defaults to `$HOME/.passwd-s3fs`
    #[serde(default)]
    pub s3fs_passwd_file: Option<PathBuf>,
    #[serde(default = "default_mount_timeout_secs")]
    pub mount_timeout_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for log files (stdout only if not set)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub erase: EraserConfig,
}

fn default_plugin_dir() -> PathBuf {
    PathBuf::from(DEFAULT_PLUGIN_DIR)
}

fn default_geesefs_source() -> PathBuf {
    PathBuf::from("/usr/bin/geesefs")
}

fn default_geesefs_staged() -> PathBuf {
    PathBuf::from("/csi/geesefs")
}

fn default_mount_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            plugin_dir: default_plugin_dir(),
            geesefs_source: default_geesefs_source(),
            geesefs_staged: default_geesefs_staged(),
            s3fs_passwd_file: None,
            mount_timeout_secs: default_mount_timeout_secs(),
            log_level: default_log_level(),
            log_dir: None,
            erase: EraserConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Load from `path`, or from the default location when it exists. A
    /// non-empty `PLUGIN_DIR` in the environment overrides `plugin_dir`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };

        if let Ok(dir) = std::env::var(PLUGIN_DIR_ENV) {
            if !dir.is_empty() {
                config.plugin_dir = PathBuf::from(dir);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log_level()?;
        if self.mount_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "mount_timeout_secs must be positive".to_string(),
            ));
        }
        if self.erase.batch_size == 0 || self.erase.batch_size > bucket::DEFAULT_BATCH_SIZE {
            return Err(ConfigError::Invalid(format!(
                "erase.batch_size must be between 1 and {}",
                bucket::DEFAULT_BATCH_SIZE
            )));
        }
        if self.erase.parallelism == 0 || self.erase.parallelism > bucket::MAX_PARALLELISM {
            return Err(ConfigError::Invalid(format!(
                "erase.parallelism must be between 1 and {}",
                bucket::MAX_PARALLELISM
            )));
        }
        Ok(())
    }

    pub fn log_level(&self) -> Result<tracing::Level, ConfigError> {
        tracing::Level::from_str(&self.log_level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level: {}", self.log_level)))
    }

    pub fn mount_timeout(&self) -> Duration {
        Duration::from_secs(self.mount_timeout_secs)
    }

    /// The geesefs path as the host sees it, which is what a unit runs.
    pub fn host_geesefs(&self) -> PathBuf {
        self.plugin_dir.join("geesefs")
    }

    pub fn passwd_file(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.s3fs_passwd_file {
            return Ok(path.clone());
        }
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)?;
        Ok(home.join(PASSWD_FILE_NAME))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("no home directory found")]
    NoHomeDirectory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = DriverConfig::from_toml("").unwrap();
        assert_eq!(config, DriverConfig::default());
        assert_eq!(config.mount_timeout(), Duration::from_secs(10));
        assert_eq!(config.erase.batch_size, 1000);
        assert_eq!(config.erase.parallelism, 16);
        assert_eq!(
            config.host_geesefs(),
            PathBuf::from("/var/lib/kubelet/plugins/ru.yandex.s3.csi/geesefs")
        );
    }

    #[test]
    fn test_partial_file() {
        let config = DriverConfig::from_toml(
            r#"
            plugin_dir = "/plugins/s3"
            log_level = "debug"
            s3fs_passwd_file = "/run/s3fs/passwd"

            [erase]
            parallelism = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.plugin_dir, PathBuf::from("/plugins/s3"));
        assert_eq!(config.log_level().unwrap(), tracing::Level::DEBUG);
        assert_eq!(config.passwd_file().unwrap(), PathBuf::from("/run/s3fs/passwd"));
        assert_eq!(config.erase.parallelism, 4);
        assert_eq!(config.erase.batch_size, 1000);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(DriverConfig::from_toml("log_level = \"loud\"").is_err());
        assert!(DriverConfig::from_toml("mount_timeout_secs = 0").is_err());
        assert!(DriverConfig::from_toml("[erase]\nbatch_size = 5000").is_err());
        assert!(DriverConfig::from_toml("[erase]\nparallelism = 0").is_err());
        assert!(DriverConfig::from_toml("[erase]\nparallelism = 4294967296").is_err());
        assert!(DriverConfig::from_toml("[erase]\nparallelism = 1024").is_ok());
        assert!(DriverConfig::from_toml("plugin_dir = 3").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "mount_timeout_secs = 30\n").unwrap();

        let config = DriverConfig::from_file(&path).unwrap();
        assert_eq!(config.mount_timeout(), Duration::from_secs(30));

        let missing = DriverConfig::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
