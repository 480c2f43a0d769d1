//! Domain types for the acoustic monitor.
//!
//! This module contains the core data structures:
//! - SharedContext: per-cycle bus owned by the pipeline thread
//! - ActionTag: what a matching policy asks for
//! - EventObject: a finished recording handed to the uploader
//! - MetricsRow: one record of the metrics CSV

pub mod action;
pub mod context;
pub mod event;
pub mod metrics_row;

// Re-export commonly used types
pub use action::ActionTag;
pub use context::{
    Chunk, PreRollRing, SharedContext, METRIC_DBSPL, METRIC_FLUX, METRIC_RMS, SILENCE_LABEL,
    UNKNOWN_LABEL,
};
pub use event::{upload_metadata, EventMetadata, EventObject, EvidenceSidecar};
pub use metrics_row::{MetricsRow, SystemSnapshot, CSV_HEADER, SYSTEM_CHECK_LABEL};
