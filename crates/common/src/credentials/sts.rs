use http::header::{HeaderValue, CONTENT_TYPE};
use http::HeaderMap;
use s3::signing::uri_encode;
use serde::Deserialize;
use time::OffsetDateTime;
use url::Url;

use super::{CallerIdentity, CredentialError, ResolvedCredentials};
use crate::signing::{self, SigningScope};

const STS_VERSION: &str = "2011-06-15";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// Token-exchange service used for role assumption.
#[async_trait::async_trait]
pub trait TrustBroker: Send + Sync {
    async fn assume_role(
        &self,
        region: &str,
        base: &ResolvedCredentials,
        role_arn: &str,
        session_name: &str,
    ) -> Result<ResolvedCredentials, CredentialError>;

    async fn caller_identity(
        &self,
        region: &str,
        creds: &ResolvedCredentials,
    ) -> Result<CallerIdentity, CredentialError>;
}

/// AWS STS over its query API.
#[derive(Debug, Clone)]
pub struct StsClient {
    http: reqwest::Client,
    /// Overrides the regional endpoint, mostly for tests and private links
    endpoint: Option<Url>,
}

impl Default for StsClient {
    fn default() -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AssumeRoleResponse {
    #[serde(rename = "AssumeRoleResult")]
    result: AssumeRoleResult,
}

#[derive(Debug, Deserialize)]
struct AssumeRoleResult {
    #[serde(rename = "Credentials")]
    credentials: StsCredentials,
}

#[derive(Debug, Deserialize)]
struct StsCredentials {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    secret_access_key: String,
    #[serde(rename = "SessionToken")]
    session_token: String,
}

#[derive(Debug, Deserialize)]
struct GetCallerIdentityResponse {
    #[serde(rename = "GetCallerIdentityResult")]
    result: GetCallerIdentityResult,
}

#[derive(Debug, Deserialize)]
struct GetCallerIdentityResult {
    #[serde(rename = "Account")]
    account: String,
    #[serde(rename = "Arn")]
    arn: String,
    #[serde(rename = "UserId")]
    user_id: String,
}

impl StsClient {
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    fn endpoint_for(&self, region: &str) -> Result<Url, CredentialError> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }
        let raw = if region.is_empty() {
            "https://sts.amazonaws.com/".to_string()
        } else {
            format!("https://sts.{}.amazonaws.com/", region)
        };
        Url::parse(&raw).map_err(|e| CredentialError::Response(e.to_string()))
    }

    async fn call(
        &self,
        region: &str,
        creds: &ResolvedCredentials,
        params: &[(&str, &str)],
    ) -> Result<String, CredentialError> {
        let url = self.endpoint_for(region)?;
        let body = form_body(params);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        let headers = signing::sign(
            "POST",
            &url,
            headers,
            body.as_bytes(),
            creds,
            SigningScope::new(region, "sts"),
            OffsetDateTime::now_utc(),
        )?;

        let request = self.http.post(url).headers(headers).body(body);
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CredentialError::Broker {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

fn form_body(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
        .collect::<Vec<_>>()
        .join("&")
}

fn parse_assume_role(xml: &str) -> Result<ResolvedCredentials, CredentialError> {
    let parsed: AssumeRoleResponse =
        quick_xml::de::from_str(xml).map_err(|e| CredentialError::Response(e.to_string()))?;
    let c = parsed.result.credentials;
    ResolvedCredentials::from_parts(
        Some(c.access_key_id),
        Some(c.secret_access_key),
        Some(c.session_token),
    )
    .ok_or_else(|| CredentialError::Response("incomplete credentials".to_string()))
}

fn parse_caller_identity(xml: &str) -> Result<CallerIdentity, CredentialError> {
    let parsed: GetCallerIdentityResponse =
        quick_xml::de::from_str(xml).map_err(|e| CredentialError::Response(e.to_string()))?;
    Ok(CallerIdentity {
        account: parsed.result.account,
        arn: parsed.result.arn,
        user_id: parsed.result.user_id,
    })
}

#[async_trait::async_trait]
impl TrustBroker for StsClient {
    async fn assume_role(
        &self,
        region: &str,
        base: &ResolvedCredentials,
        role_arn: &str,
        session_name: &str,
    ) -> Result<ResolvedCredentials, CredentialError> {
        let xml = self
            .call(
                region,
                base,
                &[
                    ("Action", "AssumeRole"),
                    ("Version", STS_VERSION),
                    ("RoleArn", role_arn),
                    ("RoleSessionName", session_name),
                ],
            )
            .await?;
        parse_assume_role(&xml)
    }

    async fn caller_identity(
        &self,
        region: &str,
        creds: &ResolvedCredentials,
    ) -> Result<CallerIdentity, CredentialError> {
        let xml = self
            .call(
                region,
                creds,
                &[("Action", "GetCallerIdentity"), ("Version", STS_VERSION)],
            )
            .await?;
        parse_caller_identity(&xml)
    }
}
