//! Object-store configuration for one volume class.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::volume::MounterKind;

pub const SECRET_ACCESS_KEY_ID: &str = "accessKeyID";
pub const SECRET_SECRET_ACCESS_KEY: &str = "secretAccessKey";
pub const SECRET_REGION: &str = "region";
pub const SECRET_ENDPOINT: &str = "endpoint";
pub const SECRET_ROLE_ARN: &str = "awsRoleArn";

/// Connection and credential settings shared by every volume of a class.
///
/// Holds no mutable state; the mounter is filled in from the volume context,
/// never from the secret.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub role_arn: String,
    #[serde(default)]
    pub mounter: MounterKind,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("role_arn", &self.role_arn)
            .field("mounter", &self.mounter)
            .finish()
    }
}

impl StoreConfig {
    /// Build from the provisioning secret.
    pub fn from_secrets(secrets: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| secrets.get(key).cloned().unwrap_or_default();

        let config = Self {
            access_key_id: get(SECRET_ACCESS_KEY_ID),
            secret_access_key: get(SECRET_SECRET_ACCESS_KEY),
            region: get(SECRET_REGION),
            endpoint: get(SECRET_ENDPOINT),
            role_arn: get(SECRET_ROLE_ARN),
            mounter: MounterKind::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_mounter(mut self, mounter: MounterKind) -> Self {
        self.mounter = mounter;
        self
    }

    /// Static keys present; the role, if any, is ignored.
    pub fn has_static_keys(&self) -> bool {
        !self.access_key_id.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.endpoint.is_empty() {
            self.endpoint_url()?;
        }
        if self
            .region
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(ConfigError::InvalidRegion(self.region.clone()));
        }
        Ok(())
    }

    /// Parsed endpoint. A bare `host:port` is treated as plain http, which is
    /// what S3 gateways usually listen on inside a cluster.
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let raw = self.endpoint.trim();
        if raw.is_empty() {
            return Err(ConfigError::InvalidEndpoint("endpoint is empty".to_string()));
        }
        let candidate = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{}", raw)
        };
        let url = Url::parse(&candidate)
            .map_err(|e| ConfigError::InvalidEndpoint(format!("{}: {}", raw, e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::InvalidEndpoint(raw.to_string()));
        }
        Ok(url)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("unknown mounter: {0}")]
    UnknownMounter(String),

    #[error("invalid volume context: {0}")]
    VolumeContext(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_secrets() {
        let config = StoreConfig::from_secrets(&secrets(&[
            ("accessKeyID", "AKIA"),
            ("secretAccessKey", "s3cr3t"),
            ("region", "ru-central1"),
            ("endpoint", "https://storage.yandexcloud.net"),
        ]))
        .unwrap();

        assert!(config.has_static_keys());
        assert_eq!(config.region, "ru-central1");
        assert_eq!(config.role_arn, "");
        assert_eq!(config.mounter, MounterKind::Geesefs);
        assert_eq!(
            config.endpoint_url().unwrap().host_str(),
            Some("storage.yandexcloud.net")
        );
    }

    #[test]
    fn test_bare_endpoint_is_http() {
        let config = StoreConfig {
            endpoint: "minio.minio.svc:9000".to_string(),
            ..Default::default()
        };
        let url = config.endpoint_url().unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.port(), Some(9000));
    }

    #[test]
    fn test_malformed_endpoint_and_region() {
        let err = StoreConfig::from_secrets(&secrets(&[("endpoint", "ftp://example.com")]));
        assert!(matches!(err, Err(ConfigError::InvalidEndpoint(_))));

        let err = StoreConfig::from_secrets(&secrets(&[("region", "us east")]));
        assert!(matches!(err, Err(ConfigError::InvalidRegion(_))));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = StoreConfig {
            secret_access_key: "hunter2".to_string(),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
