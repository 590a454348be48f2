//! Bucket and prefix lifecycle
//!
//! Provisions and destroys the bucket (or the prefix inside a shared bucket)
//! that backs a volume. Two client variants exist:
//!
//! - **Native**: no static keys in the secret; credentials come from the
//!   ambient chain, optionally exchanged for an assumed role.
//! - **Gateway**: static keys against an S3-compatible endpoint, path-style.
//!
//! Deleting a bucket or prefix first empties it through the
//! [`BulkObjectEraser`], which batches deletions and falls back to
//! bounded-parallel single deletions when the bulk call is not supported.
//!
//! # Example
//!
//! ```rust,no_run
//! use bucket::BucketClient;
//! use common::prelude::StoreConfig;
//!
//! # async fn example() -> Result<(), bucket::BucketError> {
//! let config = StoreConfig {
//!     access_key_id: "AKIA...".to_string(),
//!     secret_access_key: "...".to_string(),
//!     endpoint: "http://minio:9000".to_string(),
//!     ..Default::default()
//! };
//! let client = BucketClient::from_config(config).await?;
//! if !client.bucket_exists("volumes").await? {
//!     client.create_bucket("volumes").await?;
//! }
//! client.create_prefix("volumes", "pvc-1234").await?;
//! # Ok(())
//! # }
//! ```

mod api;
mod client;
mod eraser;
mod error;
mod storage;
pub mod testkit;

pub use api::{ListPage, ObjectStoreApi};
pub use client::{BucketClient, ClientVariant};
pub use eraser::{
    BulkObjectEraser, EraseReport, EraserConfig, ObjectKeySet, DEFAULT_BATCH_SIZE,
    DEFAULT_PARALLELISM, MAX_PARALLELISM,
};
pub use error::{BucketError, Result};
pub use storage::S3Storage;
