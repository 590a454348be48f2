use std::sync::Arc;

use common::credentials::CLIENT_SESSION_NAME;
use common::prelude::{CredentialResolver, StoreConfig};

use crate::api::ObjectStoreApi;
use crate::eraser::{BulkObjectEraser, EraserConfig};
use crate::error::{BucketError, Result};
use crate::storage::S3Storage;

/// How the client talks to the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientVariant {
    /// AWS S3 with ambient or role-assumed credentials
    Native,
    /// S3-compatible gateway with static keys and path-style addressing
    Gateway,
}

impl ClientVariant {
    /// Static keys in the config select the gateway variant.
    pub fn for_config(config: &StoreConfig) -> Self {
        if config.has_static_keys() {
            ClientVariant::Gateway
        } else {
            ClientVariant::Native
        }
    }
}

/// Bucket and prefix lifecycle for one volume class.
#[derive(Clone)]
pub struct BucketClient {
    config: StoreConfig,
    variant: ClientVariant,
    api: Arc<dyn ObjectStoreApi>,
    eraser: BulkObjectEraser,
}

impl std::fmt::Debug for BucketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketClient")
            .field("config", &self.config)
            .field("variant", &self.variant)
            .field("eraser", &self.eraser)
            .finish()
    }
}

impl BucketClient {
    pub async fn from_config(config: StoreConfig) -> Result<Self> {
        let resolver = CredentialResolver::default().with_session_name(CLIENT_SESSION_NAME);
        Self::from_config_with(config, &resolver, EraserConfig::default()).await
    }

    /// Build the S3-backed client, resolving credentials for the native
    /// variant through `resolver`.
    pub async fn from_config_with(
        config: StoreConfig,
        resolver: &CredentialResolver,
        eraser: EraserConfig,
    ) -> Result<Self> {
        config.validate()?;
        let variant = ClientVariant::for_config(&config);

        let storage = match variant {
            ClientVariant::Gateway => {
                let endpoint = config.endpoint_url()?;
                let credentials = resolver
                    .resolve(
                        &config.region,
                        &config.access_key_id,
                        &config.secret_access_key,
                        "",
                    )
                    .await;
                S3Storage::new(endpoint, config.region.clone(), credentials, true)
            }
            ClientVariant::Native => {
                let endpoint = if config.endpoint.is_empty() {
                    S3Storage::aws_endpoint(&config.region)?
                } else {
                    config.endpoint_url()?
                };
                let credentials = resolver
                    .resolve(&config.region, "", "", &config.role_arn)
                    .await;
                S3Storage::new(endpoint, config.region.clone(), credentials, false)
            }
        };

        if storage.is_anonymous() {
            tracing::warn!(
                ?variant,
                region = %config.region,
                "no credentials resolved, continuing unauthenticated"
            );
        }
        tracing::debug!(?variant, endpoint = %config.endpoint, "bucket client ready");
        Ok(Self::with_api(config, variant, Arc::new(storage), eraser))
    }

    pub fn with_api(
        config: StoreConfig,
        variant: ClientVariant,
        api: Arc<dyn ObjectStoreApi>,
        eraser: EraserConfig,
    ) -> Self {
        let eraser = BulkObjectEraser::new(api.clone(), eraser);
        Self {
            config,
            variant,
            api,
            eraser,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn variant(&self) -> ClientVariant {
        self.variant
    }

    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.api.bucket_exists(bucket).await
    }

    /// Create `bucket` with a location constraint of the configured region.
    pub async fn create_bucket(&self, bucket: &str) -> Result<()> {
        tracing::info!(bucket, region = %self.config.region, "creating bucket");
        self.api.create_bucket(bucket, &self.config.region).await
    }

    /// Put the `prefix/` marker. An empty prefix means the volume is the
    /// whole bucket, so there is nothing to create.
    pub async fn create_prefix(&self, bucket: &str, prefix: &str) -> Result<()> {
        if prefix.is_empty() {
            return Ok(());
        }
        let marker = marker_key(prefix);
        tracing::info!(bucket, prefix, "creating prefix marker");
        self.api.put_empty(bucket, &marker).await
    }

    /// Purge everything under `prefix/`, then delete the marker. The marker
    /// is deleted even when the purge left objects behind.
    pub async fn remove_prefix(&self, bucket: &str, prefix: &str) -> Result<()> {
        if prefix.is_empty() {
            return Ok(());
        }
        let marker = marker_key(prefix);

        let report = self.eraser.erase(bucket, &marker).await;
        if !report.is_clean() {
            tracing::error!(
                bucket,
                prefix,
                attempted = report.attempted,
                failed = report.failed,
                "failed to purge prefix"
            );
        }

        let deleted = self.api.delete_object(bucket, &marker).await;

        if !report.is_clean() {
            let marker_error = deleted.err().map(|e| {
                tracing::error!(bucket, prefix, "failed to delete prefix marker: {}", e);
                e.to_string()
            });
            return Err(BucketError::Purge {
                target: format!("{}/{}", bucket, marker),
                report,
                marker_error,
            });
        }
        deleted?;
        tracing::info!(bucket, prefix, removed = report.attempted, "removed prefix");
        Ok(())
    }

    /// Purge the bucket, then delete it. The bucket is left in place when any
    /// object could not be removed.
    pub async fn remove_bucket(&self, bucket: &str) -> Result<()> {
        let report = self.eraser.erase(bucket, "").await;
        if !report.is_clean() {
            tracing::error!(
                bucket,
                attempted = report.attempted,
                failed = report.failed,
                "failed to purge bucket, not deleting it"
            );
            return Err(BucketError::Purge {
                target: bucket.to_string(),
                report,
                marker_error: None,
            });
        }

        tracing::info!(bucket, removed = report.attempted, "deleting bucket");
        self.api.delete_bucket(bucket).await
    }
}

fn marker_key(prefix: &str) -> String {
    format!("{}/", prefix.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_for_config() {
        let mut config = StoreConfig::default();
        assert_eq!(ClientVariant::for_config(&config), ClientVariant::Native);

        config.role_arn = "arn:aws:iam::123456789012:role/csi".to_string();
        assert_eq!(ClientVariant::for_config(&config), ClientVariant::Native);

        config.access_key_id = "AKIA".to_string();
        assert_eq!(ClientVariant::for_config(&config), ClientVariant::Gateway);
    }

    #[test]
    fn test_marker_key() {
        assert_eq!(marker_key("pvc-1"), "pvc-1/");
        assert_eq!(marker_key("a/b/"), "a/b/");
    }

    #[tokio::test]
    async fn test_gateway_requires_endpoint() {
        let config = StoreConfig {
            access_key_id: "AKIA".to_string(),
            secret_access_key: "secret".to_string(),
            ..Default::default()
        };
        let err = BucketClient::from_config(config).await.unwrap_err();
        assert!(matches!(err, BucketError::Config(_)));
    }

    #[tokio::test]
    async fn test_gateway_client_from_config() {
        let config = StoreConfig {
            access_key_id: "AKIA".to_string(),
            secret_access_key: "secret".to_string(),
            endpoint: "minio.storage:9000".to_string(),
            ..Default::default()
        };
        let client = BucketClient::from_config(config).await.unwrap();
        assert_eq!(client.variant(), ClientVariant::Gateway);
        assert_eq!(client.config().endpoint, "minio.storage:9000");
    }
}
