//! Volume context persisted by the provisioning layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store_config::ConfigError;

/// Mount option that keeps GeeseFS out of the host service manager.
pub const NO_SYSTEMD_OPTION: &str = "--no-systemd";

/// Which foreign FUSE tool backs a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MounterKind {
    /// GeeseFS, kept alive as a transient host service
    #[default]
    Geesefs,
    /// rclone in its own daemon mode
    Rclone,
    /// s3fs with a password file or an IAM role
    S3fs,
}

impl MounterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MounterKind::Geesefs => "geesefs",
            MounterKind::Rclone => "rclone",
            MounterKind::S3fs => "s3fs",
        }
    }
}

impl fmt::Display for MounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MounterKind {
    type Err = ConfigError;

    /// An empty selector means the default mounter.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "geesefs" => Ok(MounterKind::Geesefs),
            "rclone" => Ok(MounterKind::Rclone),
            "s3fs" => Ok(MounterKind::S3fs),
            other => Err(ConfigError::UnknownMounter(other.to_string())),
        }
    }
}

/// Everything needed to attach a provisioned volume.
///
/// The JSON field names are the ones stored in the volume context, so a record
/// written by an older driver still decodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMeta {
    #[serde(rename = "Name")]
    pub bucket_name: String,
    #[serde(rename = "Prefix", default)]
    pub prefix: String,
    #[serde(rename = "Mounter", default, deserialize_with = "lenient_mounter")]
    pub mounter: MounterKind,
    #[serde(rename = "MountOptions", default, deserialize_with = "nullable_options")]
    pub mount_options: Vec<String>,
    #[serde(rename = "CapacityBytes", default)]
    pub capacity_bytes: i64,
}

impl VolumeMeta {
    pub fn new(bucket_name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            prefix: prefix.into(),
            mounter: MounterKind::default(),
            mount_options: Vec::new(),
            capacity_bytes: 0,
        }
    }

    pub fn with_mounter(mut self, mounter: MounterKind) -> Self {
        self.mounter = mounter;
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mount_options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capacity(mut self, capacity_bytes: i64) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::VolumeContext(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string(self).map_err(|e| ConfigError::VolumeContext(e.to_string()))
    }
}

fn nullable_options<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_mounter<'de, D>(deserializer: D) -> Result<MounterKind, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_context_field_names() {
        let meta = VolumeMeta::new("bucket", "pvc-1")
            .with_mounter(MounterKind::Rclone)
            .with_options(["--memory-limit", "1000"])
            .with_capacity(1 << 30);

        let json: serde_json::Value = serde_json::from_str(&meta.to_json().unwrap()).unwrap();
        assert_eq!(json["Name"], "bucket");
        assert_eq!(json["Prefix"], "pvc-1");
        assert_eq!(json["Mounter"], "rclone");
        assert_eq!(json["MountOptions"][1], "1000");
        assert_eq!(json["CapacityBytes"], 1i64 << 30);
    }

    #[test]
    fn test_empty_mounter_means_geesefs() {
        let meta =
            VolumeMeta::from_json(r#"{"Name":"b","Prefix":"","Mounter":"","MountOptions":null}"#)
                .unwrap();
        assert_eq!(meta.mounter, MounterKind::Geesefs);
        assert!(meta.mount_options.is_empty());

        let meta = VolumeMeta::from_json(r#"{"Name":"b"}"#).unwrap();
        assert_eq!(meta.mounter, MounterKind::Geesefs);
        assert_eq!(meta.prefix, "");
        assert_eq!(meta.capacity_bytes, 0);
    }

    #[test]
    fn test_unknown_mounter_rejected() {
        assert!(matches!(
            "goofys".parse::<MounterKind>(),
            Err(ConfigError::UnknownMounter(name)) if name == "goofys"
        ));
        assert!(VolumeMeta::from_json(r#"{"Name":"b","Mounter":"goofys"}"#).is_err());
    }
}
