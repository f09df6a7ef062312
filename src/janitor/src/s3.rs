//! [`MultipartStore`] backed by the AWS SDK S3 client.
//!
//! Works against AWS S3 and S3-compatible stores (MinIO and friends); the
//! client is expected to arrive fully configured, see
//! `common::storage::create_s3_client`.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::list_multipart_uploads::ListMultipartUploadsOutput;
use aws_sdk_s3::operation::list_parts::ListPartsOutput;

use crate::error::StoreError;
use crate::store::{
    MultipartStore, MultipartUpload, PartPage, UploadMarker, UploadPage, UploadedPart,
};

const LIST_UPLOADS: &str = "ListMultipartUploads";
const LIST_PARTS: &str = "ListParts";
const ABORT_UPLOAD: &str = "AbortMultipartUpload";

/// S3 error code for an upload that was completed or aborted.
const NO_SUCH_UPLOAD: &str = "NoSuchUpload";

#[derive(Clone, Debug)]
pub struct S3MultipartStore {
    client: Client,
}

impl S3MultipartStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MultipartStore for S3MultipartStore {
    async fn list_uploads(
        &self,
        bucket: &str,
        marker: &UploadMarker,
    ) -> Result<UploadPage, StoreError> {
        let output = self
            .client
            .list_multipart_uploads()
            .bucket(bucket)
            .set_key_marker(marker.key_marker.clone())
            .set_upload_id_marker(marker.upload_id_marker.clone())
            .send()
            .await
            .map_err(|e| StoreError::request(LIST_UPLOADS, bucket, e))?;

        upload_page(&output)
    }

    async fn list_parts(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
        part_number_marker: Option<String>,
    ) -> Result<PartPage, StoreError> {
        let output = self
            .client
            .list_parts()
            .bucket(bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .set_part_number_marker(part_number_marker)
            .send()
            .await
            .map_err(|e| {
                if is_no_such_upload(&e) {
                    no_such_upload(upload)
                } else {
                    StoreError::request(LIST_PARTS, bucket, e)
                }
            })?;

        part_page(&output)
    }

    async fn abort_upload(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
    ) -> Result<(), StoreError> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .send()
            .await
            .map_err(|e| {
                let modeled = e
                    .as_service_error()
                    .is_some_and(|service_err| service_err.is_no_such_upload());
                if modeled || is_no_such_upload(&e) {
                    no_such_upload(upload)
                } else {
                    StoreError::request(ABORT_UPLOAD, bucket, e)
                }
            })?;

        Ok(())
    }
}

fn is_no_such_upload<E: ProvideErrorMetadata, R>(err: &SdkError<E, R>) -> bool {
    err.as_service_error().and_then(|e| e.code()) == Some(NO_SUCH_UPLOAD)
}

fn no_such_upload(upload: &MultipartUpload) -> StoreError {
    StoreError::NoSuchUpload {
        key: upload.key.clone(),
        upload_id: upload.upload_id.clone(),
    }
}

fn upload_page(output: &ListMultipartUploadsOutput) -> Result<UploadPage, StoreError> {
    let uploads = output
        .uploads()
        .iter()
        .map(|upload| {
            let key = upload
                .key()
                .ok_or_else(|| StoreError::malformed(LIST_UPLOADS, "upload without a key"))?;
            let upload_id = upload.upload_id().ok_or_else(|| {
                StoreError::malformed(LIST_UPLOADS, format!("upload for {key} without an id"))
            })?;
            Ok(MultipartUpload::new(key, upload_id))
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    let is_truncated = output
        .is_truncated()
        .ok_or_else(|| StoreError::malformed(LIST_UPLOADS, "missing IsTruncated"))?;

    Ok(UploadPage {
        uploads,
        is_truncated,
        next_marker: UploadMarker {
            key_marker: output.next_key_marker().map(str::to_string),
            upload_id_marker: output.next_upload_id_marker().map(str::to_string),
        },
    })
}

fn part_page(output: &ListPartsOutput) -> Result<PartPage, StoreError> {
    let parts = output
        .parts()
        .iter()
        .map(|part| {
            let part_number = part
                .part_number()
                .ok_or_else(|| StoreError::malformed(LIST_PARTS, "part without a number"))?;
            let size = part.size().ok_or_else(|| {
                StoreError::malformed(LIST_PARTS, format!("part {part_number} without a size"))
            })?;
            let size = u64::try_from(size).map_err(|_| {
                StoreError::malformed(
                    LIST_PARTS,
                    format!("part {part_number} has negative size {size}"),
                )
            })?;
            Ok(UploadedPart { part_number, size })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    let is_truncated = output
        .is_truncated()
        .ok_or_else(|| StoreError::malformed(LIST_PARTS, "missing IsTruncated"))?;

    Ok(PartPage {
        parts,
        is_truncated,
        next_part_number_marker: output.next_part_number_marker().map(str::to_string),
    })
}
