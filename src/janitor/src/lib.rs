//! Multipart upload janitor
//!
//! Finds multipart uploads that were started but never completed or aborted
//! and aborts them, reclaiming the storage their parts occupy.
//!
//! ```no_run
//! use std::sync::Arc;
//! use janitor::{CleanupOptions, MultipartCleaner, S3MultipartStore};
//!
//! # async fn run(client: aws_sdk_s3::Client) -> Result<(), janitor::StoreError> {
//! let cleaner = MultipartCleaner::new(
//!     Arc::new(S3MultipartStore::new(client)),
//!     CleanupOptions::default(),
//! );
//! let summary = cleaner.cleanup("my-bucket").await?;
//! println!("aborted {} uploads", summary.uploads_aborted);
//! # Ok(())
//! # }
//! ```

pub mod cleanup;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod s3;
pub mod store;

pub use cleanup::{CleanupOptions, CleanupSummary, MultipartCleaner};
pub use common::config::MissingUploadPolicy;
pub use error::StoreError;
pub use s3::S3MultipartStore;
pub use store::{
    MultipartStore, MultipartUpload, PartPage, UploadMarker, UploadPage, UploadedPart,
};
