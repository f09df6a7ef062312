//! In-memory [`MultipartStore`] for tests.
//!
//! Mirrors the S3 listing contract: uploads are ordered by (key, upload id),
//! pages are bounded, and truncated pages carry the markers of their last
//! entry. Aborting an upload that is gone fails with
//! [`StoreError::NoSuchUpload`], just like S3.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::store::{
    MultipartStore, MultipartUpload, PartPage, UploadMarker, UploadPage, UploadedPart,
};

/// S3's default page size for both listings.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, thiserror::Error)]
#[error("bucket {0} does not exist")]
pub struct NoSuchBucket(pub String);

#[derive(Debug, thiserror::Error)]
#[error("invalid part number marker {0:?}")]
pub struct InvalidPartMarker(pub String);

type Parts = BTreeMap<i32, u64>;
type Bucket = BTreeMap<MultipartUpload, Parts>;

pub struct InMemoryMultipartStore {
    buckets: Mutex<HashMap<String, Bucket>>,
    upload_page_size: usize,
    part_page_size: usize,
    next_upload_id: AtomicUsize,
    list_upload_calls: AtomicUsize,
    list_part_calls: AtomicUsize,
    abort_calls: AtomicUsize,
    aborted: Mutex<Vec<MultipartUpload>>,
}

impl Default for InMemoryMultipartStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMultipartStore {
    pub fn new() -> Self {
        Self::with_page_sizes(DEFAULT_PAGE_SIZE, DEFAULT_PAGE_SIZE)
    }

    /// Store returning at most `upload_page_size` uploads and
    /// `part_page_size` parts per listing call. Zero is treated as one.
    pub fn with_page_sizes(upload_page_size: usize, part_page_size: usize) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            upload_page_size: upload_page_size.max(1),
            part_page_size: part_page_size.max(1),
            next_upload_id: AtomicUsize::new(1),
            list_upload_calls: AtomicUsize::new(0),
            list_part_calls: AtomicUsize::new(0),
            abort_calls: AtomicUsize::new(0),
            aborted: Mutex::new(Vec::new()),
        }
    }

    pub async fn create_bucket(&self, bucket: &str) {
        self.buckets
            .lock()
            .await
            .entry(bucket.to_string())
            .or_default();
    }

    /// Start a multipart upload with a generated upload id.
    pub async fn create_upload(&self, bucket: &str, key: &str) -> MultipartUpload {
        let id = self.next_upload_id.fetch_add(1, Ordering::Relaxed);
        let upload = MultipartUpload::new(key, format!("upload-{id:06}"));
        self.insert_upload(bucket, upload.clone()).await;
        upload
    }

    /// Start a multipart upload with a caller-chosen upload id.
    pub async fn insert_upload(&self, bucket: &str, upload: MultipartUpload) {
        self.buckets
            .lock()
            .await
            .entry(bucket.to_string())
            .or_default()
            .entry(upload)
            .or_default();
    }

    pub async fn upload_part(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
        part_number: i32,
        size: u64,
    ) -> Result<(), StoreError> {
        let mut buckets = self.buckets.lock().await;
        let parts = buckets
            .get_mut(bucket)
            .and_then(|uploads| uploads.get_mut(upload))
            .ok_or_else(|| no_such_upload(upload))?;
        parts.insert(part_number, size);
        Ok(())
    }

    /// Finish an upload the way a legitimate writer would, removing it from
    /// the open set.
    pub async fn complete_upload(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
    ) -> Result<(), StoreError> {
        self.remove(bucket, upload).await.map(|_| ())
    }

    /// Open uploads in listing order.
    pub async fn open_uploads(&self, bucket: &str) -> Vec<MultipartUpload> {
        self.buckets
            .lock()
            .await
            .get(bucket)
            .map(|uploads| uploads.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Uploads removed through `abort_upload`, in call order.
    pub async fn aborted(&self) -> Vec<MultipartUpload> {
        self.aborted.lock().await.clone()
    }

    /// Every `abort_upload` call, successful or not.
    pub fn abort_calls(&self) -> usize {
        self.abort_calls.load(Ordering::Relaxed)
    }

    pub fn list_upload_calls(&self) -> usize {
        self.list_upload_calls.load(Ordering::Relaxed)
    }

    pub fn list_part_calls(&self) -> usize {
        self.list_part_calls.load(Ordering::Relaxed)
    }

    async fn remove(&self, bucket: &str, upload: &MultipartUpload) -> Result<Parts, StoreError> {
        self.buckets
            .lock()
            .await
            .get_mut(bucket)
            .and_then(|uploads| uploads.remove(upload))
            .ok_or_else(|| no_such_upload(upload))
    }
}

fn no_such_upload(upload: &MultipartUpload) -> StoreError {
    StoreError::NoSuchUpload {
        key: upload.key.clone(),
        upload_id: upload.upload_id.clone(),
    }
}

/// S3 semantics: with only a key marker, listing resumes at the next key;
/// with both, it resumes after that upload of the same key.
fn is_after_marker(upload: &MultipartUpload, marker: &UploadMarker) -> bool {
    match (&marker.key_marker, &marker.upload_id_marker) {
        (None, _) => true,
        (Some(key), None) => upload.key.as_str() > key.as_str(),
        (Some(key), Some(upload_id)) => {
            (upload.key.as_str(), upload.upload_id.as_str()) > (key.as_str(), upload_id.as_str())
        }
    }
}

#[async_trait]
impl MultipartStore for InMemoryMultipartStore {
    async fn list_uploads(
        &self,
        bucket: &str,
        marker: &UploadMarker,
    ) -> Result<UploadPage, StoreError> {
        self.list_upload_calls.fetch_add(1, Ordering::Relaxed);

        let buckets = self.buckets.lock().await;
        let uploads = buckets.get(bucket).ok_or_else(|| {
            StoreError::request(
                "ListMultipartUploads",
                bucket,
                NoSuchBucket(bucket.to_string()),
            )
        })?;

        let mut remaining = uploads.keys().filter(|u| is_after_marker(u, marker));
        let page: Vec<MultipartUpload> = remaining
            .by_ref()
            .take(self.upload_page_size)
            .cloned()
            .collect();
        let is_truncated = remaining.next().is_some();

        let next_marker = match page.last() {
            Some(last) if is_truncated => UploadMarker::new(&last.key, &last.upload_id),
            _ => UploadMarker::default(),
        };

        Ok(UploadPage {
            uploads: page,
            is_truncated,
            next_marker,
        })
    }

    async fn list_parts(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
        part_number_marker: Option<String>,
    ) -> Result<PartPage, StoreError> {
        self.list_part_calls.fetch_add(1, Ordering::Relaxed);

        let after = match part_number_marker {
            Some(marker) => marker.parse::<i32>().map_err(|_| {
                StoreError::request("ListParts", bucket, InvalidPartMarker(marker.clone()))
            })?,
            None => 0,
        };

        let buckets = self.buckets.lock().await;
        let parts = buckets
            .get(bucket)
            .and_then(|uploads| uploads.get(upload))
            .ok_or_else(|| no_such_upload(upload))?;

        let mut remaining = parts.range(after.saturating_add(1)..);
        let page: Vec<UploadedPart> = remaining
            .by_ref()
            .take(self.part_page_size)
            .map(|(&part_number, &size)| UploadedPart { part_number, size })
            .collect();
        let is_truncated = remaining.next().is_some();

        let next_part_number_marker = match page.last() {
            Some(last) if is_truncated => Some(last.part_number.to_string()),
            _ => None,
        };

        Ok(PartPage {
            parts: page,
            is_truncated,
            next_part_number_marker,
        })
    }

    async fn abort_upload(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
    ) -> Result<(), StoreError> {
        self.abort_calls.fetch_add(1, Ordering::Relaxed);

        self.remove(bucket, upload).await?;
        self.aborted.lock().await.push(upload.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_listing_pages_follow_markers() {
        let store = InMemoryMultipartStore::with_page_sizes(2, 2);
        for key in ["a", "b", "c"] {
            store
                .insert_upload("b1", MultipartUpload::new(key, format!("u{key}")))
                .await;
        }

        let first = store
            .list_uploads("b1", &UploadMarker::default())
            .await
            .unwrap();
        assert_eq!(first.uploads.len(), 2);
        assert!(first.is_truncated);
        assert_eq!(first.next_marker, UploadMarker::new("b", "ub"));

        let second = store.list_uploads("b1", &first.next_marker).await.unwrap();
        assert_eq!(second.uploads, vec![MultipartUpload::new("c", "uc")]);
        assert!(!second.is_truncated);
        assert!(second.next_marker.is_start());
    }

    #[tokio::test]
    async fn test_same_key_uploads_split_across_pages() {
        let store = InMemoryMultipartStore::with_page_sizes(1, 1);
        store
            .insert_upload("b1", MultipartUpload::new("obj", "u1"))
            .await;
        store
            .insert_upload("b1", MultipartUpload::new("obj", "u2"))
            .await;

        let first = store
            .list_uploads("b1", &UploadMarker::default())
            .await
            .unwrap();
        let second = store.list_uploads("b1", &first.next_marker).await.unwrap();

        assert_eq!(first.uploads, vec![MultipartUpload::new("obj", "u1")]);
        assert_eq!(second.uploads, vec![MultipartUpload::new("obj", "u2")]);
    }

    #[test]
    fn test_key_marker_alone_skips_the_whole_key() {
        let upload = MultipartUpload::new("a", "u1");
        let marker = UploadMarker {
            key_marker: Some("a".to_string()),
            upload_id_marker: None,
        };
        assert!(!is_after_marker(&upload, &marker));
        assert!(is_after_marker(&MultipartUpload::new("b", "u0"), &marker));
    }

    #[tokio::test]
    async fn test_part_listing_pages() {
        let store = InMemoryMultipartStore::with_page_sizes(10, 2);
        let upload = store.create_upload("b1", "obj").await;
        for (number, size) in [(1, 10), (2, 20), (3, 30)] {
            store.upload_part("b1", &upload, number, size).await.unwrap();
        }

        let first = store.list_parts("b1", &upload, None).await.unwrap();
        assert_eq!(first.parts.len(), 2);
        assert!(first.is_truncated);
        assert_eq!(first.next_part_number_marker.as_deref(), Some("2"));

        let second = store
            .list_parts("b1", &upload, first.next_part_number_marker)
            .await
            .unwrap();
        assert_eq!(
            second.parts,
            vec![UploadedPart {
                part_number: 3,
                size: 30
            }]
        );
        assert!(!second.is_truncated);
        assert_eq!(store.list_part_calls(), 2);
    }

    #[tokio::test]
    async fn test_abort_twice_reports_no_such_upload() {
        let store = InMemoryMultipartStore::new();
        let upload = store.create_upload("b1", "obj").await;

        store.abort_upload("b1", &upload).await.unwrap();
        let err = store.abort_upload("b1", &upload).await.unwrap_err();

        assert!(err.is_no_such_upload());
        assert_eq!(store.abort_calls(), 2);
        assert_eq!(store.aborted().await, vec![upload]);
        assert!(store.open_uploads("b1").await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_bucket_is_a_request_error() {
        let store = InMemoryMultipartStore::new();
        let err = store
            .list_uploads("missing", &UploadMarker::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Request { .. }));
        assert!(err.to_string().contains("bucket missing does not exist"));
    }
}
