use std::sync::Arc;

use bucket::testkit::MemoryObjectStore;
use bucket::{BucketClient, BucketError, ClientVariant, EraserConfig};
use common::prelude::StoreConfig;

fn client(store: &Arc<MemoryObjectStore>) -> BucketClient {
    let config = StoreConfig {
        access_key_id: "AKIA".to_string(),
        secret_access_key: "secret".to_string(),
        region: "ru-central1".to_string(),
        endpoint: "http://minio:9000".to_string(),
        ..Default::default()
    };
    BucketClient::with_api(
        config,
        ClientVariant::Gateway,
        store.clone(),
        EraserConfig::default(),
    )
}

fn objects(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{}/obj-{:05}", prefix, i)).collect()
}

#[tokio::test]
async fn create_bucket_uses_configured_region() {
    let store = Arc::new(MemoryObjectStore::new());
    let client = client(&store);

    assert!(!client.bucket_exists("volumes").await.unwrap());
    client.create_bucket("volumes").await.unwrap();

    assert!(client.bucket_exists("volumes").await.unwrap());
    assert_eq!(
        store.bucket_region("volumes").as_deref(),
        Some("ru-central1")
    );
}

#[tokio::test]
async fn create_empty_prefix_makes_no_calls() {
    let store = Arc::new(MemoryObjectStore::new());
    store.seed("volumes", Vec::<String>::new());

    client(&store).create_prefix("volumes", "").await.unwrap();

    assert_eq!(store.stats().calls, 0);
    assert!(store.keys("volumes").is_empty());
}

#[tokio::test]
async fn create_prefix_puts_one_marker() {
    let store = Arc::new(MemoryObjectStore::new());
    store.seed("volumes", Vec::<String>::new());

    client(&store).create_prefix("volumes", "foo").await.unwrap();

    assert_eq!(store.stats().puts, 1);
    assert_eq!(store.keys("volumes"), vec!["foo/".to_string()]);
}

#[tokio::test]
async fn remove_prefix_purges_and_drops_marker() {
    let store = Arc::new(MemoryObjectStore::new().with_page_size(500));
    store.seed("volumes", ["foo/", "foobar/keep"]);
    store.seed("volumes", objects("foo", 1200));

    client(&store).remove_prefix("volumes", "foo").await.unwrap();

    assert_eq!(store.keys("volumes"), vec!["foobar/keep".to_string()]);
    assert!(store.stats().list_pages >= 3);
}

#[tokio::test]
async fn remove_prefix_reports_leftovers_after_deleting_marker() {
    let store = Arc::new(MemoryObjectStore::new());
    store.seed("volumes", ["foo/"]);
    store.seed("volumes", objects("foo", 20));
    store.fail_deletes_of(["foo/obj-00004", "foo/obj-00011"]);

    let err = client(&store)
        .remove_prefix("volumes", "foo")
        .await
        .unwrap_err();

    match err {
        BucketError::Purge {
            target,
            report,
            marker_error,
        } => {
            assert_eq!(target, "volumes/foo/");
            assert_eq!(report.failed, 2);
            assert!(marker_error.is_none());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        store.keys("volumes"),
        vec!["foo/obj-00004".to_string(), "foo/obj-00011".to_string()]
    );
}

#[tokio::test]
async fn remove_prefix_keeps_purge_count_when_marker_delete_fails() {
    let store = Arc::new(MemoryObjectStore::new());
    store.seed("volumes", ["foo/", "foo/a", "foo/b", "foo/c"]);
    store.fail_deletes_of(["foo/", "foo/b"]);

    let err = client(&store)
        .remove_prefix("volumes", "foo")
        .await
        .unwrap_err();

    match &err {
        BucketError::Purge {
            target,
            report,
            marker_error,
        } => {
            assert_eq!(target, "volumes/foo/");
            assert_eq!(report.attempted, 4);
            assert_eq!(report.failed, 2);
            assert!(marker_error
                .as_deref()
                .is_some_and(|e| e.contains("AccessDenied: foo/")));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("failed to remove 2 objects out of 4"));
    assert!(err.to_string().contains("marker not deleted"));
    assert_eq!(
        store.keys("volumes"),
        vec!["foo/".to_string(), "foo/b".to_string()]
    );
}

#[tokio::test]
async fn remove_prefix_with_undeletable_marker() {
    let store = Arc::new(MemoryObjectStore::new().with_bulk_unsupported());
    store.seed("volumes", ["foo/", "foo/a"]);
    store.fail_deletes_of(["foo/"]);

    // the purge also reaches the marker, so it is not clean either
    let err = client(&store)
        .remove_prefix("volumes", "foo")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BucketError::Purge { ref report, marker_error: Some(_), .. } if report.failed == 1
    ));
}

#[tokio::test]
async fn remove_bucket_paginates_and_deletes() {
    let store = Arc::new(MemoryObjectStore::new().with_page_size(1000));
    store.seed("volumes", objects("pvc", 2500));

    client(&store).remove_bucket("volumes").await.unwrap();

    assert!(!store.has_bucket("volumes"));
    assert_eq!(store.stats().bulk_deletes, 3);
    assert_eq!(store.stats().bucket_deletes, 1);
}

#[tokio::test]
async fn remove_bucket_keeps_bucket_on_failures() {
    let store = Arc::new(MemoryObjectStore::new().with_bulk_unsupported());
    store.seed("volumes", objects("pvc", 40));
    store.fail_deletes_of(["pvc/obj-00001"]);

    let err = client(&store).remove_bucket("volumes").await.unwrap_err();

    assert_eq!(store.stats().bucket_deletes, 0);
    assert!(store.has_bucket("volumes"));
    assert!(err.to_string().contains("failed to remove 1 objects out of 40"));
}

#[tokio::test]
async fn remove_bucket_keeps_bucket_when_listing_breaks() {
    let store = Arc::new(MemoryObjectStore::new().with_page_size(10));
    store.seed("volumes", objects("pvc", 30));
    store.fail_listing_after_pages(1);

    let err = client(&store).remove_bucket("volumes").await.unwrap_err();

    assert!(matches!(err, BucketError::Purge { .. }));
    assert_eq!(store.stats().bucket_deletes, 0);
    assert_eq!(store.keys("volumes").len(), 20);
}
