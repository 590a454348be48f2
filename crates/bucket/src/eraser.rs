//! Emptying a bucket or prefix before it is deleted.
//!
//! The primary path lists every key, then deletes them in provider-sized
//! batches. If any batch fails the eraser starts over with single deletions:
//! a producer task streams a fresh listing into a channel while at most
//! `parallelism` deletions run at once. The report counts what was attempted
//! and what failed instead of stopping at the first error.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};

use crate::api::ObjectStoreApi;
use crate::error::{BucketError, Result};

/// S3 accepts at most this many keys per DeleteObjects call.
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_PARALLELISM: usize = 16;
/// Upper bound on concurrent single deletions.
pub const MAX_PARALLELISM: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraserConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

impl Default for EraserConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

/// Keys found under a bucket/prefix at deletion time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectKeySet {
    keys: Vec<String>,
}

impl ObjectKeySet {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn batches(&self, size: usize) -> std::slice::Chunks<'_, String> {
        self.keys.chunks(size.max(1))
    }
}

impl FromIterator<String> for ObjectKeySet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// Outcome of one erase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EraseReport {
    /// Keys a deletion was issued for
    pub attempted: usize,
    /// Keys that are still there as far as we know
    pub failed: usize,
    /// Set when the listing stopped early, so `attempted` may be short
    pub listing_error: Option<String>,
    /// Whether single deletions were used
    pub fallback: bool,
}

impl EraseReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.listing_error.is_none()
    }
}

impl fmt::Display for EraseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to remove {} objects out of {} attempted",
            self.failed, self.attempted
        )?;
        if let Some(e) = &self.listing_error {
            write!(f, " (listing incomplete: {})", e)?;
        }
        Ok(())
    }
}

/// Why the batched path gave up, and how many keys it had already removed.
/// The fallback re-lists, so removed keys are not attempted twice.
struct BulkFailure {
    removed: usize,
    error: BucketError,
}

#[derive(Clone)]
pub struct BulkObjectEraser {
    api: Arc<dyn ObjectStoreApi>,
    config: EraserConfig,
}

impl fmt::Debug for BulkObjectEraser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkObjectEraser")
            .field("config", &self.config)
            .finish()
    }
}

impl BulkObjectEraser {
    pub fn new(api: Arc<dyn ObjectStoreApi>, config: EraserConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> EraserConfig {
        self.config
    }

    /// Remove everything under `prefix` (the whole bucket for `""`).
    pub async fn erase(&self, bucket: &str, prefix: &str) -> EraseReport {
        match self.erase_in_batches(bucket, prefix).await {
            Ok(report) => report,
            Err(BulkFailure { removed, error }) => {
                tracing::warn!(
                    bucket,
                    prefix,
                    removed,
                    "bulk delete failed with: {}, will delete objects one by one",
                    error
                );
                let mut report = self.erase_one_by_one(bucket, prefix).await;
                report.attempted += removed;
                report
            }
        }
    }

    /// Walk every listing page.
    pub async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<ObjectKeySet> {
        let mut keys = Vec::new();
        let mut continuation = None;
        loop {
            let page = self
                .api
                .list_page(bucket, prefix, continuation.take())
                .await
                .map_err(|e| BucketError::Listing {
                    bucket: bucket.to_string(),
                    prefix: prefix.to_string(),
                    reason: e.to_string(),
                })?;
            keys.extend(page.keys);
            match page.next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        Ok(ObjectKeySet { keys })
    }

    async fn erase_in_batches(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> std::result::Result<EraseReport, BulkFailure> {
        let keys = self
            .list_keys(bucket, prefix)
            .await
            .map_err(|error| BulkFailure { removed: 0, error })?;
        tracing::info!(bucket, prefix, "found {} keys", keys.len());

        let mut removed = 0;
        for batch in keys.batches(self.config.batch_size) {
            let refused = self
                .api
                .delete_objects(bucket, batch)
                .await
                .map_err(|error| BulkFailure { removed, error })?;
            removed += batch.len().saturating_sub(refused.len());
            if !refused.is_empty() {
                for key in &refused {
                    tracing::error!(bucket, key = %key, "failed to remove object");
                }
                return Err(BulkFailure {
                    removed,
                    error: BucketError::BulkDelete {
                        attempted: batch.len(),
                        reason: format!("{} objects refused", refused.len()),
                    },
                });
            }
        }

        Ok(EraseReport {
            attempted: keys.len(),
            ..Default::default()
        })
    }

    async fn erase_one_by_one(&self, bucket: &str, prefix: &str) -> EraseReport {
        let parallelism = self.config.parallelism.clamp(1, MAX_PARALLELISM);
        let (tx, mut rx) = mpsc::channel::<String>(1);

        let producer = {
            let api = self.api.clone();
            let bucket = bucket.to_string();
            let prefix = prefix.to_string();
            tokio::spawn(async move {
                let mut continuation = None;
                loop {
                    let page = api.list_page(&bucket, &prefix, continuation.take()).await?;
                    for key in page.keys {
                        if tx.send(key).await.is_err() {
                            return Ok(());
                        }
                    }
                    match page.next {
                        Some(token) => continuation = Some(token),
                        None => return Ok::<(), BucketError>(()),
                    }
                }
            })
        };

        let guard = Arc::new(Semaphore::new(parallelism));
        let failed = Arc::new(AtomicUsize::new(0));
        let mut attempted = 0usize;

        while let Some(key) = rx.recv().await {
            let permit = match guard.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            attempted += 1;

            let api = self.api.clone();
            let failed = failed.clone();
            let bucket = bucket.to_string();
            tokio::spawn(async move {
                if let Err(e) = api.delete_object(&bucket, &key).await {
                    tracing::error!(bucket = %bucket, key = %key, "failed to remove object: {}", e);
                    failed.fetch_add(1, Ordering::SeqCst);
                }
                drop(permit);
            });
        }

        // every permit back means every deletion finished
        let _drained = guard.acquire_many(parallelism as u32).await;

        let listing_error = match producer.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(e) = &listing_error {
            tracing::error!(bucket, prefix, "error listing objects: {}", e);
        }

        EraseReport {
            attempted,
            failed: failed.load(Ordering::SeqCst),
            listing_error,
            fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::MemoryObjectStore;

    fn eraser(store: &Arc<MemoryObjectStore>) -> BulkObjectEraser {
        BulkObjectEraser::new(store.clone(), EraserConfig::default())
    }

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("pvc/{:05}", i)).collect()
    }

    #[tokio::test]
    async fn test_batches_of_one_thousand() {
        let store = Arc::new(MemoryObjectStore::new());
        store.seed("b", keys(2500));

        let report = eraser(&store).erase("b", "pvc/").await;

        assert!(report.is_clean());
        assert!(!report.fallback);
        assert_eq!(report.attempted, 2500);
        assert_eq!(store.stats().bulk_deletes, 3);
        assert_eq!(store.stats().single_deletes, 0);
        assert!(store.keys("b").is_empty());
    }

    #[tokio::test]
    async fn test_listing_follows_continuation() {
        let store = Arc::new(MemoryObjectStore::new().with_page_size(100));
        store.seed("b", keys(250));

        let set = eraser(&store).list_keys("b", "").await.unwrap();
        assert_eq!(set.len(), 250);
        assert_eq!(store.stats().list_pages, 3);
    }

    #[tokio::test]
    async fn test_prefix_scoping() {
        let store = Arc::new(MemoryObjectStore::new());
        store.seed("b", ["a/1", "a/2", "ab/1", "b/1"]);

        let report = eraser(&store).erase("b", "a/").await;
        assert_eq!(report.attempted, 2);
        assert_eq!(store.keys("b"), vec!["ab/1".to_string(), "b/1".to_string()]);
    }

    #[tokio::test]
    async fn test_fallback_is_bounded_and_counts_failures() {
        let store = Arc::new(MemoryObjectStore::new().with_bulk_unsupported());
        store.seed("b", keys(2500));
        store.fail_deletes_of(["pvc/00007", "pvc/01234", "pvc/02499"]);

        let report = eraser(&store).erase("b", "").await;

        assert!(report.fallback);
        assert_eq!(report.attempted, 2500);
        assert_eq!(report.failed, 3);
        assert!(!report.is_clean());
        assert_eq!(store.stats().single_deletes, 2500);
        assert!(store.stats().max_in_flight <= DEFAULT_PARALLELISM);
        assert!(store.stats().max_in_flight > 1);
        assert_eq!(store.keys("b").len(), 3);
    }

    #[tokio::test]
    async fn test_refused_keys_trigger_fallback() {
        let store = Arc::new(MemoryObjectStore::new());
        store.seed("b", keys(10));
        store.fail_deletes_of(["pvc/00003"]);

        let report = eraser(&store).erase("b", "").await;

        assert!(report.fallback);
        assert_eq!(store.stats().bulk_deletes, 1);
        // nine removed in bulk, the fallback retries the refused one
        assert_eq!(store.stats().single_deletes, 1);
        assert_eq!(report.attempted, 10);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_counts_span_bulk_and_fallback() {
        let store = Arc::new(MemoryObjectStore::new());
        store.seed("b", keys(2500));
        store.fail_deletes_of(["pvc/01500"]);

        let report = eraser(&store).erase("b", "").await;

        assert!(report.fallback);
        assert_eq!(store.stats().bulk_deletes, 2);
        // the refused key plus the untouched third batch
        assert_eq!(store.stats().single_deletes, 501);
        assert_eq!(report.attempted, 2500);
        assert_eq!(report.failed, 1);
        assert_eq!(store.keys("b"), vec!["pvc/01500".to_string()]);
    }

    #[tokio::test]
    async fn test_oversized_parallelism_is_capped() {
        let store = Arc::new(MemoryObjectStore::new().with_bulk_unsupported());
        store.seed("b", keys(50));
        let config = EraserConfig {
            parallelism: u32::MAX as usize + 1,
            ..Default::default()
        };

        let report = BulkObjectEraser::new(store.clone(), config)
            .erase("b", "")
            .await;

        assert!(report.is_clean());
        assert_eq!(report.attempted, 50);
        assert!(store.keys("b").is_empty());
        assert!(store.stats().max_in_flight <= MAX_PARALLELISM);
    }

    #[tokio::test]
    async fn test_listing_failure_mid_stream_still_drains() {
        let store = Arc::new(
            MemoryObjectStore::new()
                .with_page_size(100)
                .with_bulk_unsupported(),
        );
        store.seed("b", keys(300));
        store.fail_listing_after_pages(2);

        let report = eraser(&store).erase("b", "").await;

        assert!(report.fallback);
        assert_eq!(report.attempted, 200);
        assert_eq!(report.failed, 0);
        assert!(report.listing_error.is_some());
        assert!(!report.is_clean());
        assert_eq!(store.keys("b").len(), 100);
    }
}
