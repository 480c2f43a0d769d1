//! Evidence events handed from the recorder to the uploader.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Descriptive metadata attached to an uploaded recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Highest-confidence non-silence label seen during the recording
    pub label: String,

    /// Confidence of that label
    pub confidence: f64,

    /// Whether the saved audio passed through the calibration transform
    pub calibrated: bool,

    /// Peak calibrated level during the recording (only when calibrated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_dbspl: Option<f64>,
}

/// A finished recording. Immutable once built; ownership moves to the
/// uploader when enqueued.
#[derive(Debug, Clone)]
pub struct EventObject {
    pub id: Uuid,

    /// When the recording started
    pub timestamp: DateTime<Utc>,

    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub audio_samples: Vec<f32>,
    pub metadata: EventMetadata,
}

impl EventObject {
    /// Sidecar record persisted next to a dead-letter WAV
    pub fn sidecar(&self) -> EvidenceSidecar {
        EvidenceSidecar {
            id: self.id,
            timestamp: self.timestamp,
            duration_seconds: self.duration_seconds,
            sample_rate: self.sample_rate,
            metadata: self.metadata.clone(),
        }
    }
}

/// JSON sidecar written next to offline evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSidecar {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    #[serde(flatten)]
    pub metadata: EventMetadata,
}

impl EvidenceSidecar {
    /// Object-store metadata for this evidence
    pub fn upload_metadata(&self) -> Vec<(String, String)> {
        upload_metadata(&self.id, &self.timestamp, &self.metadata)
    }
}

/// Build the metadata pairs sent alongside an uploaded recording
pub fn upload_metadata(
    id: &Uuid,
    timestamp: &DateTime<Utc>,
    metadata: &EventMetadata,
) -> Vec<(String, String)> {
    vec![
        ("label".to_string(), metadata.label.clone()),
        ("confidence".to_string(), format!("{:.4}", metadata.confidence)),
        ("calibrated".to_string(), metadata.calibrated.to_string()),
        ("uuid".to_string(), id.to_string()),
        ("timestamp".to_string(), timestamp.to_rfc3339()),
    ]
}
