use std::collections::HashMap;
use std::path::PathBuf;

use clap::Args;
use common::prelude::{ConfigError, StoreConfig};

/// Provisioning secret, as a JSON file of string values and/or
/// `--secret key=value` pairs. Pairs override the file.
#[derive(Args, Debug, Clone, Default)]
pub struct SecretArgs {
    /// JSON object with accessKeyID, secretAccessKey, region, endpoint, awsRoleArn
    #[arg(long)]
    pub secrets_file: Option<PathBuf>,

    /// A single secret entry, e.g. --secret region=ru-central1
    #[arg(long = "secret", value_parser = parse_key_val)]
    pub secrets: Vec<(String, String)>,
}

#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("failed to read secrets file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid secrets file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SecretArgs {
    pub fn load(&self) -> Result<HashMap<String, String>, SecretsError> {
        let mut secrets = match &self.secrets_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| SecretsError::Read {
                    path: path.clone(),
                    source,
                })?;
                serde_json::from_str(&raw).map_err(|source| SecretsError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
            None => HashMap::new(),
        };
        secrets.extend(self.secrets.iter().cloned());
        Ok(secrets)
    }

    pub fn store_config(&self) -> Result<StoreConfig, SecretsError> {
        Ok(StoreConfig::from_secrets(&self.load()?)?)
    }
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))
}
