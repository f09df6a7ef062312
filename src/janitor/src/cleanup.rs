//! Abort multipart uploads that were never completed.
//!
//! The cleaner walks every open multipart upload in a bucket, reports how many
//! bytes each one holds, and aborts it. Both listings are paginated by the
//! store, so both walks follow the same shape: fetch a page, fold its items,
//! then either advance the continuation marker or stop.
//!
//! Nothing survives between runs. Every call re-lists the bucket from the
//! start, so running the cleaner twice, or from two places at once, is safe:
//! the loser of an abort race sees `NoSuchUpload`, which is handled according
//! to [`MissingUploadPolicy`].

use std::sync::Arc;

use tracing::Level;

use crate::error::StoreError;
use crate::store::{MultipartStore, MultipartUpload, UploadMarker};
use common::config::{CleanupConfig, MissingUploadPolicy};

const LIST_UPLOADS: &str = "ListMultipartUploads";
const LIST_PARTS: &str = "ListParts";

/// Runtime options of a [`MultipartCleaner`].
#[derive(Clone, Debug)]
pub struct CleanupOptions {
    /// Log what would be aborted, abort nothing.
    pub dry_run: bool,
    pub on_missing_upload: MissingUploadPolicy,
    /// Walk each upload's parts to report its size.
    pub report_sizes: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self::from(&CleanupConfig::default())
    }
}

impl From<&CleanupConfig> for CleanupOptions {
    fn from(config: &CleanupConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            on_missing_upload: config.on_missing_upload,
            report_sizes: config.report_sizes,
        }
    }
}

/// Outcome of one cleanup pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Upload listing pages fetched.
    pub pages: usize,
    /// Uploads aborted by this pass.
    pub uploads_aborted: usize,
    /// Uploads a dry run would have aborted.
    pub would_abort: usize,
    /// Uploads that disappeared before this pass could act on them.
    pub already_resolved: usize,
    /// Bytes held by the aborted (or would-be aborted) uploads, when sizes
    /// were reported.
    pub bytes_reclaimed: u64,
    pub dry_run: bool,
}

impl CleanupSummary {
    /// Saturates at `u64::MAX`.
    fn add_reclaimed(&mut self, size: Option<u64>) {
        self.bytes_reclaimed = self.bytes_reclaimed.saturating_add(size.unwrap_or(0));
    }

    pub fn log(&self, bucket: &str) {
        tracing::info!(
            bucket = %bucket,
            pages = self.pages,
            aborted = self.uploads_aborted,
            would_abort = self.would_abort,
            already_resolved = self.already_resolved,
            bytes_reclaimed = self.bytes_reclaimed,
            dry_run = self.dry_run,
            "Multipart cleanup complete"
        );
    }
}

/// Aborts multipart uploads which have been neither completed nor aborted.
pub struct MultipartCleaner {
    store: Arc<dyn MultipartStore>,
    options: CleanupOptions,
}

impl MultipartCleaner {
    pub fn new(store: Arc<dyn MultipartStore>, options: CleanupOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &CleanupOptions {
        &self.options
    }

    /// Abort every multipart upload currently open in `bucket`.
    ///
    /// Each upload is logged at INFO with its key and total size before it is
    /// aborted. Returns once every upload found by the scan has been handled.
    ///
    /// # Errors
    ///
    /// The first listing or abort failure ends the run. Uploads that vanished
    /// in the meantime only fail the run under [`MissingUploadPolicy::Fail`].
    pub async fn cleanup(&self, bucket: &str) -> Result<CleanupSummary, StoreError> {
        let mut summary = CleanupSummary {
            dry_run: self.options.dry_run,
            ..Default::default()
        };
        let mut marker = UploadMarker::default();

        loop {
            tracing::debug!(
                bucket = %bucket,
                key_marker = marker.key_marker.as_deref().unwrap_or(""),
                upload_id_marker = marker.upload_id_marker.as_deref().unwrap_or(""),
                "Listing multipart uploads"
            );

            let page = self.store.list_uploads(bucket, &marker).await?;
            summary.pages += 1;

            for upload in &page.uploads {
                self.process_upload(bucket, upload, &mut summary).await?;
            }

            if !page.is_truncated {
                break;
            }
            marker = next_upload_marker(&marker, page.next_marker)?;
        }

        summary.log(bucket);
        Ok(summary)
    }

    /// Total bytes uploaded so far to `upload`.
    ///
    /// Walks every page of the upload's parts; an upload without parts is 0.
    pub async fn total_size(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
    ) -> Result<u64, StoreError> {
        let mut size: u64 = 0;
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .store
                .list_parts(bucket, upload, marker.clone())
                .await?;

            for part in &page.parts {
                size = size.checked_add(part.size).ok_or_else(|| {
                    StoreError::malformed(
                        LIST_PARTS,
                        format!("total size of {} overflows", upload.key),
                    )
                })?;
            }

            if !page.is_truncated {
                return Ok(size);
            }

            match page.next_part_number_marker {
                Some(next) if marker.as_deref() != Some(next.as_str()) => marker = Some(next),
                Some(next) => {
                    return Err(StoreError::malformed(
                        LIST_PARTS,
                        format!("part number marker {next} did not advance"),
                    ));
                }
                None => {
                    return Err(StoreError::malformed(
                        LIST_PARTS,
                        "truncated page without a next part number marker",
                    ));
                }
            }
        }
    }

    async fn process_upload(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
        summary: &mut CleanupSummary,
    ) -> Result<(), StoreError> {
        // The size only feeds the INFO record, and walking parts costs a
        // listing call per page.
        let size = if self.options.report_sizes && tracing::enabled!(Level::INFO) {
            match self.total_size(bucket, upload).await {
                Ok(size) => Some(size),
                Err(e) => {
                    return self.resolve_missing(
                        bucket,
                        upload,
                        e,
                        summary,
                        "Multipart upload already completed or aborted, skipping",
                    );
                }
            }
        } else {
            None
        };

        if self.options.dry_run {
            log_upload(bucket, upload, size, "Would abort multipart upload");
            summary.would_abort += 1;
            summary.add_reclaimed(size);
            return Ok(());
        }

        log_upload(bucket, upload, size, "Aborting multipart upload");

        match self.store.abort_upload(bucket, upload).await {
            Ok(()) => {
                summary.uploads_aborted += 1;
                summary.add_reclaimed(size);
                Ok(())
            }
            Err(e) => self.resolve_missing(
                bucket,
                upload,
                e,
                summary,
                "Multipart upload vanished before it could be aborted, nothing was aborted",
            ),
        }
    }

    /// Swallow `NoSuchUpload` under the skip policy, propagate everything else.
    fn resolve_missing(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
        error: StoreError,
        summary: &mut CleanupSummary,
        skip_message: &str,
    ) -> Result<(), StoreError> {
        if error.is_no_such_upload() && self.options.on_missing_upload == MissingUploadPolicy::Skip
        {
            tracing::warn!(
                bucket = %bucket,
                key = %upload.key,
                upload_id = %upload.upload_id,
                "{skip_message}"
            );
            summary.already_resolved += 1;
            return Ok(());
        }

        tracing::error!(
            bucket = %bucket,
            key = %upload.key,
            upload_id = %upload.upload_id,
            error = %error,
            "Multipart cleanup failed"
        );
        Err(error)
    }
}

fn log_upload(bucket: &str, upload: &MultipartUpload, size: Option<u64>, message: &str) {
    match size {
        Some(size) => tracing::info!(
            bucket = %bucket,
            key = %upload.key,
            upload_id = %upload.upload_id,
            size,
            "{message}"
        ),
        None => tracing::info!(
            bucket = %bucket,
            key = %upload.key,
            upload_id = %upload.upload_id,
            "{message}"
        ),
    }
}

/// Markers for the page after a truncated one.
///
/// A truncated page must hand back both markers and they must move, or the
/// scan could never finish.
fn next_upload_marker(
    current: &UploadMarker,
    next: UploadMarker,
) -> Result<UploadMarker, StoreError> {
    if next.key_marker.is_none() || next.upload_id_marker.is_none() {
        return Err(StoreError::malformed(
            LIST_UPLOADS,
            "truncated page without next key and upload id markers",
        ));
    }

    if &next == current {
        return Err(StoreError::malformed(
            LIST_UPLOADS,
            format!(
                "markers did not advance past key {:?}",
                next.key_marker.as_deref().unwrap_or_default()
            ),
        ));
    }

    Ok(next)
}
