//! The narrow object-store surface the lifecycle code is written against.

use crate::error::Result;

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Continuation token, `None` on the last page
    pub next: Option<String>,
}

/// Bucket and object calls against one object store.
#[async_trait::async_trait]
pub trait ObjectStoreApi: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Create a bucket constrained to `region`.
    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()>;

    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    /// Put a zero-length object.
    async fn put_empty(&self, bucket: &str, key: &str) -> Result<()>;

    /// List keys under `prefix`, one page at a time.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Delete a batch in one call. Returns the keys the store refused to
    /// delete; an `Err` means the call as a whole failed.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<String>>;
}
