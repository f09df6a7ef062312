//! Cleanup behaviour against the in-memory store.
//!
//! Pages are kept small so every scenario crosses page boundaries.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use janitor::memory::InMemoryMultipartStore;
use janitor::{
    CleanupOptions, MissingUploadPolicy, MultipartCleaner, MultipartStore, MultipartUpload,
    PartPage, StoreError, UploadMarker, UploadPage,
};

const MIB: u64 = 1024 * 1024;

fn cleaner(store: Arc<InMemoryMultipartStore>) -> MultipartCleaner {
    MultipartCleaner::new(store, CleanupOptions::default())
}

#[tokio::test]
async fn test_empty_bucket_issues_no_aborts() -> Result<()> {
    let store = Arc::new(InMemoryMultipartStore::with_page_sizes(2, 2));
    store.create_bucket("empty").await;

    let summary = cleaner(store.clone()).cleanup("empty").await?;

    assert_eq!(store.list_upload_calls(), 1);
    assert_eq!(store.abort_calls(), 0);
    assert_eq!(summary.pages, 1);
    assert_eq!(summary.uploads_aborted, 0);
    Ok(())
}

#[tokio::test]
async fn test_every_upload_aborted_once_across_pages() -> Result<()> {
    let store = Arc::new(InMemoryMultipartStore::with_page_sizes(2, 2));
    let mut created = Vec::new();
    for i in 0..5 {
        let upload = store.create_upload("bucket", &format!("object-{i}")).await;
        store.upload_part("bucket", &upload, 1, 5 * MIB).await?;
        created.push(upload);
    }

    let summary = cleaner(store.clone()).cleanup("bucket").await?;

    assert_eq!(store.abort_calls(), 5);
    let mut aborted = store.aborted().await;
    aborted.sort();
    assert_eq!(aborted, created);
    assert_eq!(summary.uploads_aborted, 5);
    assert_eq!(summary.pages, 3);
    assert!(store.open_uploads("bucket").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_uploads_sharing_a_key_are_all_aborted() -> Result<()> {
    let store = Arc::new(InMemoryMultipartStore::with_page_sizes(1, 1));
    for id in ["u1", "u2", "u3"] {
        store
            .insert_upload("bucket", MultipartUpload::new("same-key", id))
            .await;
    }

    cleaner(store.clone()).cleanup("bucket").await?;

    assert_eq!(store.abort_calls(), 3);
    assert!(store.open_uploads("bucket").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_total_size_across_part_pages() -> Result<()> {
    let store = Arc::new(InMemoryMultipartStore::with_page_sizes(2, 2));
    let upload = store.create_upload("bucket", "large-object").await;
    store.upload_part("bucket", &upload, 1, 5 * MIB).await?;
    store.upload_part("bucket", &upload, 2, 5 * MIB).await?;
    store.upload_part("bucket", &upload, 3, 2 * MIB).await?;

    let size = cleaner(store.clone())
        .total_size("bucket", &upload)
        .await?;

    assert_eq!(size, 12 * MIB);
    assert_eq!(store.list_part_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_second_run_is_a_no_op() -> Result<()> {
    let store = Arc::new(InMemoryMultipartStore::with_page_sizes(2, 2));
    for key in ["a", "b", "c"] {
        store.create_upload("bucket", key).await;
    }
    let cleaner = cleaner(store.clone());

    let first = cleaner.cleanup("bucket").await?;
    let aborts_after_first = store.abort_calls();
    let second = cleaner.cleanup("bucket").await?;

    assert_eq!(first.uploads_aborted, 3);
    assert_eq!(second.uploads_aborted, 0);
    assert_eq!(store.abort_calls(), aborts_after_first);
    Ok(())
}

#[tokio::test]
async fn test_uploads_on_two_pages_are_both_aborted() -> Result<()> {
    let store = Arc::new(InMemoryMultipartStore::with_page_sizes(1, 1));
    store
        .insert_upload("b2", MultipartUpload::new("a", "ua"))
        .await;
    store
        .insert_upload("b2", MultipartUpload::new("b", "ub"))
        .await;

    let summary = cleaner(store.clone()).cleanup("b2").await?;

    assert_eq!(
        store.aborted().await,
        vec![MultipartUpload::new("a", "ua"), MultipartUpload::new("b", "ub")]
    );
    assert_eq!(summary.pages, 2);
    let listing = store.list_uploads("b2", &UploadMarker::default()).await?;
    assert!(listing.uploads.is_empty());
    assert!(!listing.is_truncated);
    Ok(())
}

#[tokio::test]
async fn test_dry_run_leaves_uploads_open() -> Result<()> {
    let store = Arc::new(InMemoryMultipartStore::with_page_sizes(2, 2));
    for key in ["a", "b", "c"] {
        store.create_upload("bucket", key).await;
    }

    let options = CleanupOptions {
        dry_run: true,
        ..Default::default()
    };
    let summary = MultipartCleaner::new(store.clone(), options)
        .cleanup("bucket")
        .await?;

    assert_eq!(summary.would_abort, 3);
    assert_eq!(store.abort_calls(), 0);
    assert_eq!(store.open_uploads("bucket").await.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_missing_bucket_fails_the_run() {
    let store = Arc::new(InMemoryMultipartStore::new());

    let err = cleaner(store).cleanup("missing").await.unwrap_err();
    assert!(matches!(err, StoreError::Request { .. }));
}

/// Completes the first listed upload behind the cleaner's back, the way a
/// slow but legitimate writer would.
struct CompletingStore {
    inner: Arc<InMemoryMultipartStore>,
}

#[async_trait]
impl MultipartStore for CompletingStore {
    async fn list_uploads(
        &self,
        bucket: &str,
        marker: &UploadMarker,
    ) -> Result<UploadPage, StoreError> {
        let page = self.inner.list_uploads(bucket, marker).await?;
        if let Some(first) = page.uploads.first() {
            self.inner.complete_upload(bucket, first).await?;
        }
        Ok(page)
    }

    async fn list_parts(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
        part_number_marker: Option<String>,
    ) -> Result<PartPage, StoreError> {
        self.inner
            .list_parts(bucket, upload, part_number_marker)
            .await
    }

    async fn abort_upload(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
    ) -> Result<(), StoreError> {
        self.inner.abort_upload(bucket, upload).await
    }
}

#[tokio::test]
async fn test_upload_completed_mid_run_is_skipped() -> Result<()> {
    let inner = Arc::new(InMemoryMultipartStore::new());
    inner
        .insert_upload("bucket", MultipartUpload::new("a", "ua"))
        .await;
    inner
        .insert_upload("bucket", MultipartUpload::new("b", "ub"))
        .await;
    let store = Arc::new(CompletingStore {
        inner: inner.clone(),
    });

    let summary = MultipartCleaner::new(store, CleanupOptions::default())
        .cleanup("bucket")
        .await?;

    assert_eq!(summary.already_resolved, 1);
    assert_eq!(summary.uploads_aborted, 1);
    assert_eq!(inner.aborted().await, vec![MultipartUpload::new("b", "ub")]);
    Ok(())
}

#[tokio::test]
async fn test_upload_completed_mid_run_fails_under_fail_policy() {
    let inner = Arc::new(InMemoryMultipartStore::new());
    inner
        .insert_upload("bucket", MultipartUpload::new("a", "ua"))
        .await;
    let store = Arc::new(CompletingStore { inner });

    let options = CleanupOptions {
        on_missing_upload: MissingUploadPolicy::Fail,
        ..Default::default()
    };
    let err = MultipartCleaner::new(store, options)
        .cleanup("bucket")
        .await
        .unwrap_err();

    assert!(err.is_no_such_upload());
}

#[tokio::test]
async fn test_concurrent_runs_abort_each_upload_once() -> Result<()> {
    let store = Arc::new(InMemoryMultipartStore::with_page_sizes(2, 2));
    for i in 0..6 {
        store.create_upload("bucket", &format!("object-{i}")).await;
    }
    let first = cleaner(store.clone());
    let second = cleaner(store.clone());

    let (a, b) = tokio::join!(first.cleanup("bucket"), second.cleanup("bucket"));
    let (a, b) = (a?, b?);

    assert_eq!(a.uploads_aborted + b.uploads_aborted, 6);
    assert_eq!(store.aborted().await.len(), 6);
    assert!(store.open_uploads("bucket").await.is_empty());
    Ok(())
}
