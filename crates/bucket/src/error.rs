//! Error types for bucket lifecycle operations.

use crate::eraser::EraseReport;

/// Errors that can occur when provisioning or destroying buckets.
#[derive(Debug, thiserror::Error)]
pub enum BucketError {
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] common::prelude::ConfigError),

    /// Object storage error from the S3 client
    #[error("object storage error: {0}")]
    S3(#[from] s3::error::S3Error),

    /// Credentials rejected by the client library
    #[error("credentials error: {0}")]
    Credentials(#[from] s3::creds::error::CredentialsError),

    /// HTTP transport error on a signed request
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-success status from the object store
    #[error("{operation} returned {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// Bulk delete call rejected as a whole
    #[error("bulk delete of {attempted} objects failed: {reason}")]
    BulkDelete { attempted: usize, reason: String },

    /// Listing did not complete
    #[error("listing {bucket}/{prefix} failed: {reason}")]
    Listing {
        bucket: String,
        prefix: String,
        reason: String,
    },

    /// Emptying a bucket or prefix left objects behind
    #[error("failed to purge {target}: {report}{}", marker_note(.marker_error))]
    Purge {
        target: String,
        report: EraseReport,
        /// Set when the prefix marker could not be deleted either
        marker_error: Option<String>,
    },

    /// Malformed response body
    #[error("malformed response: {0}")]
    Response(String),
}

fn marker_note(marker_error: &Option<String>) -> String {
    match marker_error {
        Some(e) => format!("; marker not deleted: {}", e),
        None => String::new(),
    }
}

/// Result type alias for bucket operations.
pub type Result<T> = std::result::Result<T, BucketError>;
