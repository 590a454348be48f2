use s3::creds::Credentials;

use super::{CredentialError, ResolvedCredentials};

/// Source of credentials the driver process already has access to.
#[async_trait::async_trait]
pub trait AmbientCredentials: Send + Sync {
    async fn load(&self, region: &str) -> Result<ResolvedCredentials, CredentialError>;
}

/// The default provider chain: environment, shared credentials file,
/// web identity (`AWS_ROLE_ARN` + `AWS_WEB_IDENTITY_TOKEN_FILE`), container
/// credentials endpoint, then EC2 instance metadata.
#[derive(Debug, Clone, Default)]
pub struct DefaultChainCredentials {
    /// Profile section, `default` when unset
    pub profile: Option<String>,
}

impl DefaultChainCredentials {
    fn complete(creds: Credentials) -> Option<ResolvedCredentials> {
        let token = creds.session_token.or(creds.security_token);
        ResolvedCredentials::from_parts(creds.access_key, creds.secret_key, token)
    }
}

#[async_trait::async_trait]
impl AmbientCredentials for DefaultChainCredentials {
    async fn load(&self, region: &str) -> Result<ResolvedCredentials, CredentialError> {
        let profile = self.profile.clone();
        // the web identity and metadata providers make blocking HTTP calls
        let loaded = tokio::task::spawn_blocking(move || {
            Credentials::new(None, None, None, None, profile.as_deref())
        })
        .await
        .map_err(|e| CredentialError::NoAmbient(e.to_string()))?
        .map_err(|e| CredentialError::NoAmbient(e.to_string()))?;

        let creds = Self::complete(loaded).ok_or_else(|| {
            CredentialError::NoAmbient("provider chain returned no access key".to_string())
        })?;
        tracing::debug!(region, mode = ?creds.mode(), "loaded ambient credentials");
        Ok(creds)
    }
}
