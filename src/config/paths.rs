//! File-name and object-key templates.
//!
//! Single source of truth - import this instead of formatting names inline.
//!
//! | Item | Template |
//! |------|----------|
//! | Offline evidence | `evidence_{uuid}_{label}.wav` + `.json` |
//! | Live metrics CSV | `metrics_buffer.csv` |
//! | Rotated metrics | `metrics_{YYYYmmdd_HHMMSS}.csv`, then `_{n}` on a clash |
//! | Evidence key | `recordings/evidence_{uuid}.wav` |
//! | Metrics key | `metrics/{file name}` |

use chrono::{DateTime, Local};
use uuid::Uuid;

// ============================================================================
// Local files
// ============================================================================

/// Live metrics CSV inside the output directory
pub const METRICS_BUFFER_FILE: &str = "metrics_buffer.csv";

/// Glob matching offline evidence WAVs
pub const EVIDENCE_GLOB: &str = "evidence_*.wav";

/// Glob matching rotated metrics files
pub const ROTATED_METRICS_GLOB: &str = "metrics_*.csv";

const EVIDENCE_PREFIX: &str = "evidence_";

/// Replace anything outside `[A-Za-z0-9-]` with `_`
pub fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// `evidence_{uuid}_{label}.wav`
pub fn evidence_file_name(id: &Uuid, label: &str) -> String {
    format!("{}{}_{}.wav", EVIDENCE_PREFIX, id, sanitize_label(label))
}

/// Recover the event id from an evidence file name
pub fn parse_evidence_id(file_name: &str) -> Option<Uuid> {
    let rest = file_name.strip_prefix(EVIDENCE_PREFIX)?;
    // Hyphenated UUIDs are always 36 characters
    let id = rest.get(..36)?;
    Uuid::parse_str(id).ok()
}

/// `metrics_{YYYYmmdd_HHMMSS}.csv`, or `metrics_{YYYYmmdd_HHMMSS}_{seq}.csv`
/// for later rotations within the same second
pub fn rotated_metrics_name(at: &DateTime<Local>, seq: u32) -> String {
    match seq {
        0 => format!("metrics_{}.csv", at.format("%Y%m%d_%H%M%S")),
        n => format!("metrics_{}_{}.csv", at.format("%Y%m%d_%H%M%S"), n),
    }
}

// ============================================================================
// Remote keys
// ============================================================================

/// `recordings/evidence_{uuid}.wav`
pub fn evidence_key(id: &Uuid) -> String {
    format!("recordings/{}{}.wav", EVIDENCE_PREFIX, id)
}

/// `metrics/{file name}`
pub fn metrics_key(file_name: &str) -> String {
    format!("metrics/{}", file_name)
}

/// Heartbeat row id
pub fn heartbeat_id() -> String {
    format!("heartbeat-{}", Uuid::new_v4())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_evidence_name_round_trip() {
        let id = Uuid::new_v4();
        let name = evidence_file_name(&id, "Dog: bark!");
        assert!(name.ends_with("_Dog__bark_.wav"));
        assert_eq!(parse_evidence_id(&name), Some(id));
    }

    #[test]
    fn test_parse_rejects_other_files() {
        assert_eq!(parse_evidence_id("metrics_20260101_000000.csv"), None);
        assert_eq!(parse_evidence_id("evidence_short.wav"), None);
    }

    #[test]
    fn test_keys() {
        let id = Uuid::nil();
        assert_eq!(
            evidence_key(&id),
            "recordings/evidence_00000000-0000-0000-0000-000000000000.wav"
        );
        assert_eq!(metrics_key("metrics_x.csv"), "metrics/metrics_x.csv");
    }

    #[test]
    fn test_rotated_name() {
        let at = Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(rotated_metrics_name(&at, 0), "metrics_20260304_050607.csv");
        assert_eq!(rotated_metrics_name(&at, 2), "metrics_20260304_050607_2.csv");

        // Suffixed names still sort after the first and match the batch glob
        let first = rotated_metrics_name(&at, 0);
        let second = rotated_metrics_name(&at, 1);
        assert!(first < second);
        let glob = glob::Pattern::new(ROTATED_METRICS_GLOB).unwrap();
        assert!(glob.matches(&second));
    }
}
