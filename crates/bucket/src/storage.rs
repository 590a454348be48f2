//! [`ObjectStoreApi`] over a real S3 endpoint.
//!
//! Bucket and single-object calls go through `rust-s3`. Multi-object delete
//! is not exposed by that crate, so it is a signed `POST ?delete` sent with
//! the shared HTTP client.

use http::header::{HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, HeaderName};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{BucketConfiguration, Region};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use base64::Engine;
use common::prelude::ResolvedCredentials;
use common::signing::{self, SigningScope};

use crate::api::{ListPage, ObjectStoreApi};
use crate::error::{BucketError, Result};

#[derive(Debug, Serialize)]
#[serde(rename = "Delete")]
struct DeleteRequest {
    #[serde(rename = "Quiet")]
    quiet: bool,
    #[serde(rename = "Object")]
    objects: Vec<ObjectIdentifier>,
}

#[derive(Debug, Serialize)]
struct ObjectIdentifier {
    #[serde(rename = "Key")]
    key: String,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteResult {
    #[serde(rename = "Error", default)]
    errors: Vec<DeleteError>,
}

#[derive(Debug, Deserialize)]
struct DeleteError {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Code", default)]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

/// One endpoint, one credential set, any bucket.
#[derive(Clone)]
pub struct S3Storage {
    endpoint: Url,
    region: String,
    credentials: ResolvedCredentials,
    path_style: bool,
    http: reqwest::Client,
}

impl std::fmt::Debug for S3Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Storage")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .field("credentials", &self.credentials)
            .field("path_style", &self.path_style)
            .finish()
    }
}

impl S3Storage {
    pub fn new(
        endpoint: Url,
        region: impl Into<String>,
        credentials: ResolvedCredentials,
        path_style: bool,
    ) -> Self {
        Self {
            endpoint,
            region: region.into(),
            credentials,
            path_style,
            http: reqwest::Client::new(),
        }
    }

    /// Regional AWS endpoint, used when the secret names none.
    pub fn aws_endpoint(region: &str) -> Result<Url> {
        let raw = if region.is_empty() {
            "https://s3.amazonaws.com".to_string()
        } else {
            format!("https://s3.{}.amazonaws.com", region)
        };
        Url::parse(&raw).map_err(|e| BucketError::Response(e.to_string()))
    }

    pub fn is_anonymous(&self) -> bool {
        self.credentials.is_empty()
    }

    fn region(&self) -> Region {
        Region::Custom {
            region: self.region.clone(),
            endpoint: self.endpoint.as_str().trim_end_matches('/').to_string(),
        }
    }

    fn s3_credentials(&self) -> Result<Credentials> {
        if self.credentials.is_empty() {
            return Ok(Credentials::anonymous()?);
        }
        Ok(Credentials::new(
            Some(self.credentials.access_key_id()),
            Some(self.credentials.secret_access_key()),
            self.credentials.session_token(),
            None,
            None,
        )?)
    }

    fn bucket(&self, name: &str) -> Result<Box<Bucket>> {
        let bucket = Bucket::new(name, self.region(), self.s3_credentials()?)?;
        Ok(if self.path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }

    fn delete_url(&self, bucket: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        if self.path_style {
            let base = url.path().trim_end_matches('/').to_string();
            url.set_path(&format!("{}/{}", base, bucket));
        } else {
            let host = url
                .host_str()
                .ok_or_else(|| BucketError::Response(format!("endpoint has no host: {}", url)))?;
            let virtual_host = format!("{}.{}", bucket, host);
            url.set_host(Some(&virtual_host))
                .map_err(|e| BucketError::Response(e.to_string()))?;
            url.set_path("/");
        }
        url.set_query(Some("delete"));
        Ok(url)
    }
}

fn not_found(err: &S3Error) -> bool {
    matches!(err, S3Error::HttpFailWithBody(404, _))
}

fn encode_delete_request(keys: &[String]) -> Result<String> {
    let request = DeleteRequest {
        quiet: true,
        objects: keys
            .iter()
            .map(|key| ObjectIdentifier { key: key.clone() })
            .collect(),
    };
    quick_xml::se::to_string(&request).map_err(|e| BucketError::Response(e.to_string()))
}

fn parse_delete_result(body: &str) -> Result<Vec<DeleteError>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let result: DeleteResult =
        quick_xml::de::from_str(body).map_err(|e| BucketError::Response(e.to_string()))?;
    Ok(result.errors)
}

#[async_trait::async_trait]
impl ObjectStoreApi for S3Storage {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let handle = self.bucket(bucket)?;
        match handle
            .list_page(String::new(), None, None, None, Some(1))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: self.endpoint.as_str().trim_end_matches('/').to_string(),
        };
        let credentials = self.s3_credentials()?;
        let config = BucketConfiguration::default();
        let response = if self.path_style {
            Bucket::create_with_path_style(bucket, region, credentials, config).await?
        } else {
            Bucket::create(bucket, region, credentials, config).await?
        };
        if !response.success() {
            return Err(BucketError::Status {
                operation: "CreateBucket",
                status: response.response_code,
                body: response.response_text,
            });
        }
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let status = self.bucket(bucket)?.delete().await?;
        if !(200..300).contains(&status) {
            return Err(BucketError::Status {
                operation: "DeleteBucket",
                status,
                body: String::new(),
            });
        }
        Ok(())
    }

    async fn put_empty(&self, bucket: &str, key: &str) -> Result<()> {
        let response = self.bucket(bucket)?.put_object(key, &[]).await?;
        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(BucketError::Status {
                operation: "PutObject",
                status,
                body: String::from_utf8_lossy(response.as_slice()).into_owned(),
            });
        }
        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage> {
        let (result, _) = self
            .bucket(bucket)?
            .list_page(prefix.to_string(), None, continuation, None, None)
            .await?;
        let next = if result.is_truncated {
            result.next_continuation_token
        } else {
            None
        };
        Ok(ListPage {
            keys: result.contents.into_iter().map(|object| object.key).collect(),
            next,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        match self.bucket(bucket)?.delete_object(key).await {
            Ok(_) => Ok(()),
            // already gone
            Err(e) if not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.delete_url(bucket)?;
        let body = encode_delete_request(keys)?;
        let content_md5 =
            base64::engine::general_purpose::STANDARD.encode(md5::compute(body.as_bytes()).0);

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("content-md5"),
            HeaderValue::from_str(&content_md5)
                .map_err(|e| BucketError::Response(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        if !self.credentials.is_empty() {
            headers = signing::sign(
                "POST",
                &url,
                headers,
                body.as_bytes(),
                &self.credentials,
                SigningScope::new(&self.region, "s3"),
                OffsetDateTime::now_utc(),
            )?;
        }

        let request = self.http.post(url).headers(headers);
        let response = request.body(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(BucketError::Status {
                operation: "DeleteObjects",
                status: status.as_u16(),
                body: text,
            });
        }

        let errors = parse_delete_result(&text)?;
        for error in &errors {
            tracing::debug!(
                bucket,
                key = %error.key,
                code = %error.code,
                "delete refused: {}",
                error.message
            );
        }
        Ok(errors.into_iter().map(|error| error.key).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(endpoint: &str, path_style: bool) -> S3Storage {
        S3Storage::new(
            Url::parse(endpoint).unwrap(),
            "ru-central1",
            ResolvedCredentials::from_parts(
                Some("AKIA".to_string()),
                Some("secret".to_string()),
                None,
            )
            .unwrap(),
            path_style,
        )
    }

    #[test]
    fn test_delete_url_path_style() {
        let url = storage("http://minio:9000", true).delete_url("volumes").unwrap();
        assert_eq!(url.as_str(), "http://minio:9000/volumes?delete");
    }

    #[test]
    fn test_delete_url_virtual_host() {
        let url = storage("https://storage.yandexcloud.net", false)
            .delete_url("volumes")
            .unwrap();
        assert_eq!(url.as_str(), "https://volumes.storage.yandexcloud.net/?delete");
    }

    #[test]
    fn test_aws_endpoint() {
        assert_eq!(
            S3Storage::aws_endpoint("eu-west-1").unwrap().as_str(),
            "https://s3.eu-west-1.amazonaws.com/"
        );
        assert_eq!(
            S3Storage::aws_endpoint("").unwrap().as_str(),
            "https://s3.amazonaws.com/"
        );
    }

    #[test]
    fn test_encode_delete_request() {
        let body = encode_delete_request(&["a/1".to_string(), "a/2".to_string()]).unwrap();
        assert_eq!(
            body,
            "<Delete><Quiet>true</Quiet><Object><Key>a/1</Key></Object><Object><Key>a/2</Key></Object></Delete>"
        );
    }

    #[test]
    fn test_parse_delete_result_errors() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<DeleteResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Error>
    <Key>a/1</Key>
    <Code>AccessDenied</Code>
    <Message>Access Denied</Message>
  </Error>
  <Error>
    <Key>a/2</Key>
    <Code>InternalError</Code>
    <Message>try again</Message>
  </Error>
</DeleteResult>"#;
        let errors = parse_delete_result(body).unwrap();
        let keys: Vec<_> = errors.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a/1", "a/2"]);
        assert_eq!(errors[0].code, "AccessDenied");
    }

    #[test]
    fn test_parse_quiet_success() {
        let body = r#"<DeleteResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"></DeleteResult>"#;
        assert!(parse_delete_result(body).unwrap().is_empty());
        assert!(parse_delete_result("").unwrap().is_empty());
    }
}
