/// Boxed error from the underlying storage client.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transport, authentication, permission or any other service failure.
    #[error("{operation} failed for bucket {bucket}: {source}")]
    Request {
        operation: &'static str,
        bucket: String,
        #[source]
        source: BoxError,
    },

    /// The upload was completed or aborted after it was listed.
    #[error("multipart upload {upload_id} for key {key} no longer exists")]
    NoSuchUpload { key: String, upload_id: String },

    /// A listing came back without the fields needed to continue safely.
    #[error("malformed {operation} response: {reason}")]
    MalformedResponse {
        operation: &'static str,
        reason: String,
    },
}

impl StoreError {
    pub fn request(
        operation: &'static str,
        bucket: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Request {
            operation,
            bucket: bucket.into(),
            source: source.into(),
        }
    }

    pub fn malformed(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            operation,
            reason: reason.into(),
        }
    }

    pub fn is_no_such_upload(&self) -> bool {
        matches!(self, Self::NoSuchUpload { .. })
    }
}
