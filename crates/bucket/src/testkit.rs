//! In-memory [`ObjectStoreApi`] for tests.
//!
//! Counts every call, tracks how many single deletions are in flight at once
//! and can be told to refuse bulk deletes, fail individual keys or break a
//! listing after a number of pages.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::api::{ListPage, ObjectStoreApi};
use crate::error::{BucketError, Result};

const DEFAULT_PAGE_SIZE: usize = 1000;

/// Snapshot of the call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub calls: usize,
    pub list_pages: usize,
    pub puts: usize,
    pub bulk_deletes: usize,
    pub single_deletes: usize,
    pub bucket_creates: usize,
    pub bucket_deletes: usize,
    pub max_in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicUsize,
    list_pages: AtomicUsize,
    puts: AtomicUsize,
    bulk_deletes: AtomicUsize,
    single_deletes: AtomicUsize,
    bucket_creates: AtomicUsize,
    bucket_deletes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Debug, Default)]
struct Faults {
    bulk_unsupported: bool,
    failing_keys: HashSet<String>,
    listing_fails_after: Option<usize>,
}

#[derive(Debug)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashMap<String, BTreeSet<String>>>,
    /// region each bucket was created with
    regions: Mutex<HashMap<String, String>>,
    faults: Mutex<Faults>,
    counters: Counters,
    page_size: usize,
    delete_latency: Duration,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            regions: Mutex::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
            counters: Counters::default(),
            page_size: DEFAULT_PAGE_SIZE,
            delete_latency: Duration::from_millis(1),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Every bulk delete fails as a whole, like a gateway without
    /// DeleteObjects support.
    pub fn with_bulk_unsupported(self) -> Self {
        self.faults.lock().bulk_unsupported = true;
        self
    }

    /// Add `keys` to `bucket`, creating the bucket if needed.
    pub fn seed<I, K>(&self, bucket: &str, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut buckets = self.buckets.lock();
        let objects = buckets.entry(bucket.to_string()).or_default();
        objects.extend(keys.into_iter().map(Into::into));
    }

    /// Deleting any of these keys fails, singly or in bulk.
    pub fn fail_deletes_of<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.faults
            .lock()
            .failing_keys
            .extend(keys.into_iter().map(Into::into));
    }

    /// Each listing pass serves `pages` pages, then errors.
    pub fn fail_listing_after_pages(&self, pages: usize) {
        self.faults.lock().listing_fails_after = Some(pages);
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.lock().contains_key(bucket)
    }

    pub fn bucket_region(&self, bucket: &str) -> Option<String> {
        self.regions.lock().get(bucket).cloned()
    }

    /// Keys currently in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .get(bucket)
            .map(|objects| objects.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> StoreStats {
        let c = &self.counters;
        StoreStats {
            calls: c.calls.load(Ordering::SeqCst),
            list_pages: c.list_pages.load(Ordering::SeqCst),
            puts: c.puts.load(Ordering::SeqCst),
            bulk_deletes: c.bulk_deletes.load(Ordering::SeqCst),
            single_deletes: c.single_deletes.load(Ordering::SeqCst),
            bucket_creates: c.bucket_creates.load(Ordering::SeqCst),
            bucket_deletes: c.bucket_deletes.load(Ordering::SeqCst),
            max_in_flight: c.max_in_flight.load(Ordering::SeqCst),
        }
    }

    fn count(&self, counter: &AtomicUsize) {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn no_such_bucket(operation: &'static str, bucket: &str) -> BucketError {
        BucketError::Status {
            operation,
            status: 404,
            body: format!("NoSuchBucket: {}", bucket),
        }
    }
}

/// Continuation tokens are `<page number>:<last key served>`.
fn parse_token(token: &str) -> Option<(usize, &str)> {
    let (page, last) = token.split_once(':')?;
    Some((page.parse().ok()?, last))
}

#[async_trait::async_trait]
impl ObjectStoreApi for MemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.has_bucket(bucket))
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()> {
        self.count(&self.counters.bucket_creates);
        let mut buckets = self.buckets.lock();
        if buckets.contains_key(bucket) {
            return Err(BucketError::Status {
                operation: "CreateBucket",
                status: 409,
                body: format!("BucketAlreadyOwnedByYou: {}", bucket),
            });
        }
        buckets.insert(bucket.to_string(), BTreeSet::new());
        self.regions
            .lock()
            .insert(bucket.to_string(), region.to_string());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.count(&self.counters.bucket_deletes);
        let mut buckets = self.buckets.lock();
        match buckets.get(bucket) {
            None => Err(Self::no_such_bucket("DeleteBucket", bucket)),
            Some(objects) if !objects.is_empty() => Err(BucketError::Status {
                operation: "DeleteBucket",
                status: 409,
                body: format!("BucketNotEmpty: {}", bucket),
            }),
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn put_empty(&self, bucket: &str, key: &str) -> Result<()> {
        self.count(&self.counters.puts);
        let mut buckets = self.buckets.lock();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket("PutObject", bucket))?;
        objects.insert(key.to_string());
        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage> {
        self.count(&self.counters.list_pages);

        let (page, after) = match continuation.as_deref() {
            Some(token) => parse_token(token)
                .map(|(page, last)| (page, Some(last.to_string())))
                .ok_or_else(|| BucketError::Response(format!("bad continuation token {}", token)))?,
            None => (0, None),
        };

        if let Some(limit) = self.faults.lock().listing_fails_after {
            if page >= limit {
                return Err(BucketError::Status {
                    operation: "ListObjectsV2",
                    status: 500,
                    body: "InternalError".to_string(),
                });
            }
        }

        let buckets = self.buckets.lock();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| Self::no_such_bucket("ListObjectsV2", bucket))?;

        let mut remaining = objects
            .iter()
            .filter(|key| key.starts_with(prefix))
            .filter(|key| after.as_deref().map_or(true, |after| key.as_str() > after));
        let keys: Vec<String> = remaining.by_ref().take(self.page_size).cloned().collect();
        let more = remaining.next().is_some();

        let next = match keys.last() {
            Some(last) if more => Some(format!("{}:{}", page + 1, last)),
            _ => None,
        };
        Ok(ListPage { keys, next })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.count(&self.counters.single_deletes);

        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delete_latency).await;
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.faults.lock().failing_keys.contains(key) {
            return Err(BucketError::Status {
                operation: "DeleteObject",
                status: 403,
                body: format!("AccessDenied: {}", key),
            });
        }
        let mut buckets = self.buckets.lock();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket("DeleteObject", bucket))?;
        objects.remove(key);
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<String>> {
        self.count(&self.counters.bulk_deletes);

        let faults = self.faults.lock();
        if faults.bulk_unsupported {
            return Err(BucketError::Status {
                operation: "DeleteObjects",
                status: 501,
                body: "NotImplemented".to_string(),
            });
        }

        let mut buckets = self.buckets.lock();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket("DeleteObjects", bucket))?;

        let mut refused = Vec::new();
        for key in keys {
            if faults.failing_keys.contains(key) {
                refused.push(key.clone());
            } else {
                objects.remove(key);
            }
        }
        Ok(refused)
    }
}
