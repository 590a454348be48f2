//! Credential resolution.
//!
//! Static keys always take precedence. Without them the ambient chain is
//! loaded for the region and, when a role is configured, exchanged through the
//! trust broker for a short-lived session. A failed fetch degrades to an empty
//! credential set so the mount tool can report its own authentication error.

mod ambient;
mod sts;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use ambient::{AmbientCredentials, DefaultChainCredentials};
pub use sts::{StsClient, TrustBroker};

pub const ENV_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const ENV_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";

/// Session name used when a mount assumes a role.
pub const MOUNT_SESSION_NAME: &str = "k8s-csi-s3-s3driver";
/// Session name used by the bucket client.
pub const CLIENT_SESSION_NAME: &str = "k8s-csi-s3";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMode {
    /// key and secret, no token
    Static,
    /// key, secret and session token
    Assumed,
    /// nothing resolved
    Empty,
}

/// A complete credential triple, or nothing.
///
/// Construction goes through [`ResolvedCredentials::from_parts`], which refuses
/// partial sets, so a key without its secret can never reach a mount tool.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ResolvedCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl std::fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("mode", &self.mode())
            .finish()
    }
}

impl ResolvedCredentials {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns `None` for a partial set. An empty token counts as absent.
    pub fn from_parts(
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        session_token: Option<String>,
    ) -> Option<Self> {
        let key = access_key_id.filter(|k| !k.is_empty())?;
        let secret = secret_access_key.filter(|s| !s.is_empty())?;
        Some(Self {
            access_key_id: key,
            secret_access_key: secret,
            session_token: session_token.filter(|t| !t.is_empty()),
        })
    }

    pub fn mode(&self) -> CredentialMode {
        if self.access_key_id.is_empty() {
            CredentialMode::Empty
        } else if self.session_token.is_some() {
            CredentialMode::Assumed
        } else {
            CredentialMode::Static
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mode() == CredentialMode::Empty
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Environment entries for a child process or unit. Empty when nothing
    /// was resolved.
    pub fn to_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if self.is_empty() {
            return env;
        }
        env.insert(ENV_ACCESS_KEY_ID.to_string(), self.access_key_id.clone());
        env.insert(
            ENV_SECRET_ACCESS_KEY.to_string(),
            self.secret_access_key.clone(),
        );
        if let Some(token) = &self.session_token {
            env.insert(ENV_SESSION_TOKEN.to_string(), token.clone());
        }
        env
    }
}

/// Who the resolved credentials act as, as reported by the trust broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
    pub user_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no ambient credentials found: {0}")]
    NoAmbient(String),

    #[error("trust broker request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("trust broker returned {status}: {body}")]
    Broker { status: u16, body: String },

    #[error("malformed trust broker response: {0}")]
    Response(String),

    #[error("access key {0} has no secret")]
    MissingSecret(String),

    #[error("signing failed: {0}")]
    Signing(#[from] s3::error::S3Error),
}

/// Resolves credentials for one mount or client, see the module docs.
#[derive(Clone)]
pub struct CredentialResolver {
    ambient: Arc<dyn AmbientCredentials>,
    broker: Arc<dyn TrustBroker>,
    session_name: String,
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("session_name", &self.session_name)
            .finish()
    }
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new(
            Arc::new(DefaultChainCredentials::default()),
            Arc::new(StsClient::default()),
        )
    }
}

impl CredentialResolver {
    pub fn new(ambient: Arc<dyn AmbientCredentials>, broker: Arc<dyn TrustBroker>) -> Self {
        Self {
            ambient,
            broker,
            session_name: MOUNT_SESSION_NAME.to_string(),
        }
    }

    pub fn with_session_name(mut self, session_name: impl Into<String>) -> Self {
        self.session_name = session_name.into();
        self
    }

    /// Resolve, degrading any failure to [`ResolvedCredentials::empty`].
    pub async fn resolve(
        &self,
        region: &str,
        access_key_id: &str,
        secret_access_key: &str,
        role_arn: &str,
    ) -> ResolvedCredentials {
        match self
            .try_resolve(region, access_key_id, secret_access_key, role_arn)
            .await
        {
            Ok(creds) => creds,
            Err(e) => {
                tracing::error!(region, role_arn, "error retrieving credentials: {}", e);
                ResolvedCredentials::empty()
            }
        }
    }

    pub async fn try_resolve(
        &self,
        region: &str,
        access_key_id: &str,
        secret_access_key: &str,
        role_arn: &str,
    ) -> Result<ResolvedCredentials, CredentialError> {
        if !access_key_id.is_empty() {
            return ResolvedCredentials::from_parts(
                Some(access_key_id.to_string()),
                Some(secret_access_key.to_string()),
                None,
            )
            .ok_or_else(|| CredentialError::MissingSecret(access_key_id.to_string()));
        }

        let ambient = self.ambient.load(region).await?;
        if role_arn.is_empty() {
            return Ok(ambient);
        }

        tracing::info!(role_arn, "assuming role");
        let assumed = self
            .broker
            .assume_role(region, &ambient, role_arn, &self.session_name)
            .await?;

        match self.broker.caller_identity(region, &assumed).await {
            Ok(identity) => tracing::info!(
                account = %identity.account,
                arn = %identity.arn,
                user_id = %identity.user_id,
                "caller identity"
            ),
            Err(e) => tracing::error!("caller identity lookup failed: {}", e),
        }

        Ok(assumed)
    }
}
