//! AWS Signature Version 4 header signing.
//!
//! Canonicalisation, header lists and key derivation come from
//! `s3::signing`. Its scope helpers are fixed to the `s3` service, so the
//! credential scope is assembled here to cover `sts` as well.

use hmac::Mac;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, HOST};
use http::HeaderMap;
use s3::error::S3Error;
use s3::signing::{self, HmacSha256};
use s3::Region;
use sha2::{Digest, Sha256};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;
use url::Url;

use crate::credentials::ResolvedCredentials;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const DEFAULT_SIGNING_REGION: &str = "us-east-1";

const SHORT_DATE: &[FormatItem<'static>] = format_description!("[year][month][day]");
const LONG_DATETIME: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]Z");

const X_AMZ_DATE: HeaderName = HeaderName::from_static("x-amz-date");
const X_AMZ_CONTENT_SHA256: HeaderName = HeaderName::from_static("x-amz-content-sha256");
const X_AMZ_SECURITY_TOKEN: HeaderName = HeaderName::from_static("x-amz-security-token");

/// Region and service a signature is scoped to.
#[derive(Debug, Clone, Copy)]
pub struct SigningScope<'a> {
    pub region: &'a str,
    pub service: &'a str,
}

impl<'a> SigningScope<'a> {
    /// An empty region signs for `us-east-1`, the global endpoints' region.
    pub fn new(region: &'a str, service: &'a str) -> Self {
        let region = if region.is_empty() {
            DEFAULT_SIGNING_REGION
        } else {
            region
        };
        Self { region, service }
    }

    fn credential_scope(&self, now: &OffsetDateTime) -> Result<String, S3Error> {
        Ok(format!(
            "{}/{}/{}/aws4_request",
            now.format(SHORT_DATE)?,
            self.region,
            self.service
        ))
    }
}

pub fn sha256_hex(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

fn host_header(url: &Url) -> Result<HeaderValue, S3Error> {
    let host = url.host_str().unwrap_or_default();
    let value = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    Ok(HeaderValue::from_str(&value)?)
}

/// Sign a fully buffered request.
///
/// `headers` are the caller's own headers. They come back signed, together
/// with `host`, `x-amz-date`, `x-amz-content-sha256`, the session token when
/// there is one, and `authorization`; send the returned map as is.
pub fn sign(
    method: &str,
    url: &Url,
    mut headers: HeaderMap,
    payload: &[u8],
    credentials: &ResolvedCredentials,
    scope: SigningScope<'_>,
    now: OffsetDateTime,
) -> Result<HeaderMap, S3Error> {
    let payload_hash = sha256_hex(payload);
    let amz_date = now.format(LONG_DATETIME)?;

    headers.insert(HOST, host_header(url)?);
    headers.insert(X_AMZ_DATE, HeaderValue::from_str(&amz_date)?);
    headers.insert(X_AMZ_CONTENT_SHA256, HeaderValue::from_str(&payload_hash)?);
    if let Some(token) = credentials.session_token() {
        headers.insert(X_AMZ_SECURITY_TOKEN, HeaderValue::from_str(token)?);
    }

    let canonical = signing::canonical_request(method, url, &headers, &payload_hash)?;
    let credential_scope = scope.credential_scope(&now)?;
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        credential_scope,
        sha256_hex(canonical.as_bytes())
    );

    let region = Region::Custom {
        region: scope.region.to_string(),
        endpoint: String::new(),
    };
    let key = signing::signing_key(
        &now,
        credentials.secret_access_key(),
        &region,
        scope.service,
    )?;
    let mut mac = HmacSha256::new_from_slice(&key)?;
    mac.update(string_to_sign.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM,
        credentials.access_key_id(),
        credential_scope,
        signing::signed_header_string(&headers),
        signature
    );
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&authorization)?);
    Ok(headers)
}
