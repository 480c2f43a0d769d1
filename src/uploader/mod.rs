//! Hybrid online/offline uploader.
//!
//! Four independent workers:
//! - stream: uploads finished recordings as they arrive, dead-lettering on failure
//! - retry: periodically re-uploads dead-lettered evidence
//! - batch: rotates the metrics CSV and uploads rotated files
//! - disk guard: evicts the oldest evidence when the disk fills up
//!
//! Plus the metrics-log writer that owns appends to the live CSV.

pub mod batch;
pub mod dead_letter;
pub mod disk_guard;
pub mod metrics_log;
pub mod retry;
pub mod service;
pub mod stream;

use thiserror::Error;

pub use batch::{should_rotate, BatchUploader, RotationPolicy};
pub use dead_letter::{DeadLetterStore, OfflineEvidence};
pub use disk_guard::{DiskGuard, DiskUsage, Fs2DiskUsage};
pub use metrics_log::{MetricsCsv, MetricsLogSender};
pub use retry::{retry_pass, RetryReport};
pub use service::{UploaderHandles, UploaderService, UploaderSettings};
pub use stream::{StreamOutcome, StreamUploader};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Uploads are offline")]
    Offline,

    #[error("Failed to encode {0}")]
    Encode(String),

    #[error("Object store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
