//! Action tags emitted by the policy engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Something a matching policy rule asks downstream stages to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTag {
    /// Send a short alert through the notification channel
    #[serde(alias = "telegram_alert")]
    AlertNotify,

    /// Record evidence and ship it to remote storage
    CloudUpload,

    /// Log the cycle's label and metrics
    LogMetadata,

    /// Record evidence (kept locally if the network is down)
    RecordEvidence,
}

impl ActionTag {
    /// Tags that move the recorder from idle to recording
    pub const START_RECORDING: [ActionTag; 2] = [ActionTag::RecordEvidence, ActionTag::CloudUpload];

    /// Whether this tag starts (or keeps alive) a recording
    pub fn starts_recording(self) -> bool {
        Self::START_RECORDING.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlertNotify => "alert_notify",
            Self::CloudUpload => "cloud_upload",
            Self::LogMetadata => "log_metadata",
            Self::RecordEvidence => "record_evidence",
        }
    }
}

impl fmt::Display for ActionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_alias() {
        let tag: ActionTag = serde_yaml::from_str("telegram_alert").unwrap();
        assert_eq!(tag, ActionTag::AlertNotify);

        let tag: ActionTag = serde_yaml::from_str("record_evidence").unwrap();
        assert_eq!(tag, ActionTag::RecordEvidence);
    }

    #[test]
    fn test_start_tags() {
        assert!(ActionTag::RecordEvidence.starts_recording());
        assert!(ActionTag::CloudUpload.starts_recording());
        assert!(!ActionTag::AlertNotify.starts_recording());
        assert!(!ActionTag::LogMetadata.starts_recording());
    }
}
