//! Rows of the append-only metrics CSV.

use chrono::{DateTime, Local};

/// Header written when the CSV is created
pub const CSV_HEADER: &str =
    "id,timestamp,label,confidence,rms,dbspl,flux,cpu,ram,temp,disk,disk_attached";

/// Label used for periodic heartbeat rows
pub const SYSTEM_CHECK_LABEL: &str = "SystemCheck";

/// Host health figures sampled in the background
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemSnapshot {
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub temp_celsius: f64,
    pub disk_percent: f64,
    pub disk_attached_percent: f64,
}

/// One CSV record
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRow {
    pub id: String,
    pub timestamp: DateTime<Local>,
    pub label: String,
    pub confidence: f64,
    pub rms: f64,
    pub dbspl: f64,
    pub flux: f64,
    pub system: SystemSnapshot,
}

impl MetricsRow {
    /// Heartbeat row logged during long quiet periods
    pub fn system_check(id: String, timestamp: DateTime<Local>, system: SystemSnapshot) -> Self {
        Self {
            id,
            timestamp,
            label: SYSTEM_CHECK_LABEL.to_string(),
            confidence: 1.0,
            rms: 0.0,
            dbspl: 0.0,
            flux: 0.0,
            system,
        }
    }

    /// Render as one CSV line (no trailing newline)
    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{:.2},{:.4},{:.1},{:.1},{:.1},{:.1},{:.1},{:.1},{:.1}",
            csv_field(&self.id),
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            csv_field(&self.label),
            self.confidence,
            self.rms,
            self.dbspl,
            self.flux,
            self.system.cpu_percent,
            self.system.ram_percent,
            self.system.temp_celsius,
            self.system.disk_percent,
            self.system.disk_attached_percent,
        )
    }
}

/// Quote a field if it contains a delimiter, quote or newline
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
