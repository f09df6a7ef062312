//! Object-store capability used by the cleanup routine.
//!
//! The routine only ever needs three calls from the store: list open
//! multipart uploads, list the parts of one upload, and abort an upload.
//! Everything else (credentials, endpoints, retries, timeouts) belongs to
//! whoever builds the implementation.

use async_trait::async_trait;

use crate::error::StoreError;

/// An open multipart upload session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MultipartUpload {
    /// Object key the upload will create.
    pub key: String,
    /// Upload id assigned by the store.
    pub upload_id: String,
}

impl MultipartUpload {
    pub fn new(key: impl Into<String>, upload_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            upload_id: upload_id.into(),
        }
    }
}

/// A part already uploaded to an open multipart upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: i32,
    /// Part size in bytes.
    pub size: u64,
}

/// Position in an upload listing. Both fields absent means the beginning.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadMarker {
    pub key_marker: Option<String>,
    pub upload_id_marker: Option<String>,
}

impl UploadMarker {
    pub fn new(key_marker: impl Into<String>, upload_id_marker: impl Into<String>) -> Self {
        Self {
            key_marker: Some(key_marker.into()),
            upload_id_marker: Some(upload_id_marker.into()),
        }
    }

    pub fn is_start(&self) -> bool {
        self.key_marker.is_none() && self.upload_id_marker.is_none()
    }
}

/// One page of open multipart uploads.
#[derive(Clone, Debug, Default)]
pub struct UploadPage {
    pub uploads: Vec<MultipartUpload>,
    /// More uploads exist beyond this page.
    pub is_truncated: bool,
    /// Where the next page starts; only meaningful when truncated.
    pub next_marker: UploadMarker,
}

/// One page of uploaded parts.
#[derive(Clone, Debug, Default)]
pub struct PartPage {
    pub parts: Vec<UploadedPart>,
    /// More parts exist beyond this page.
    pub is_truncated: bool,
    /// Where the next page starts; only meaningful when truncated.
    pub next_part_number_marker: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MultipartStore: Send + Sync {
    /// List a page of open multipart uploads in `bucket`, starting after `marker`.
    async fn list_uploads(
        &self,
        bucket: &str,
        marker: &UploadMarker,
    ) -> Result<UploadPage, StoreError>;

    /// List a page of parts of `upload`, starting after `part_number_marker`.
    async fn list_parts(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
        part_number_marker: Option<String>,
    ) -> Result<PartPage, StoreError>;

    /// Abort `upload`, discarding its parts.
    ///
    /// Returns [`StoreError::NoSuchUpload`] when the upload is already gone.
    async fn abort_upload(&self, bucket: &str, upload: &MultipartUpload)
    -> Result<(), StoreError>;
}
