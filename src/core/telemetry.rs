//! Max-hold telemetry.
//!
//! The pipeline reports levels every chunk; the syncer publishes the peak of
//! each interval to `metrics` gauges and resets to the silence floor, so short
//! transients survive slow scrapes.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;

use super::shutdown::Shutdown;
use crate::domain::{SystemSnapshot, SILENCE_LABEL, UNKNOWN_LABEL};

/// Value the dBSPL peak resets to between intervals
pub const DBSPL_FLOOR: f64 = -99.0;

/// dBSPL reported for gated-out chunks when no calibrated level exists
pub const DBSPL_SILENCE_LEVEL: f64 = 30.0;

/// Peaks accumulated over one reporting interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peaks {
    pub dbspl: f64,
    pub rms: f64,
    pub flux: f64,
    pub confidence: f64,
}

impl Default for Peaks {
    fn default() -> Self {
        Self {
            dbspl: DBSPL_FLOOR,
            rms: 0.0,
            flux: 0.0,
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct Telemetry {
    peaks: Mutex<Peaks>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Peaks> {
        self.peaks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn update_audio(&self, dbspl: f64, rms: f64, flux: f64) {
        let mut peaks = self.lock();
        peaks.dbspl = peaks.dbspl.max(dbspl);
        peaks.rms = peaks.rms.max(rms);
        peaks.flux = peaks.flux.max(flux);
    }

    pub fn update_ai(&self, confidence: f64) {
        let mut peaks = self.lock();
        peaks.confidence = peaks.confidence.max(confidence);
    }

    /// A chunk the gate rejected: measured levels, zero confidence
    pub fn update_silence(&self, dbspl: f64, rms: f64, flux: f64) {
        self.update_audio(dbspl, rms, flux);
        self.update_ai(0.0);
    }

    /// Count a finished recording by category
    pub fn record_event(&self, label: &str) {
        if label != SILENCE_LABEL && label != UNKNOWN_LABEL {
            metrics::counter!("audio_event_count", "category" => label.to_string()).increment(1);
        }
    }

    /// Current peaks, replaced by the floor
    pub fn take_and_reset(&self) -> Peaks {
        std::mem::take(&mut *self.lock())
    }
}

/// Publish host health gauges
pub fn publish_system(snapshot: &SystemSnapshot) {
    metrics::gauge!("system_cpu_usage").set(snapshot.cpu_percent);
    metrics::gauge!("system_ram_usage").set(snapshot.ram_percent);
    metrics::gauge!("system_temp_celsius").set(snapshot.temp_celsius);
    metrics::gauge!("system_disk_usage").set(snapshot.disk_percent);
    metrics::gauge!("system_disk_attached_usage").set(snapshot.disk_attached_percent);
}

/// Install the Prometheus exporter listening on `addr`
pub fn install_prometheus(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to start Prometheus exporter")?;
    tracing::info!("Metrics exporter listening on {}", addr);
    Ok(())
}

/// Flush peaks to gauges every `interval` until shutdown
pub async fn run_syncer(telemetry: Arc<Telemetry>, interval: Duration, shutdown: Shutdown) {
    while !shutdown.wait(interval).await {
        let peaks = telemetry.take_and_reset();
        metrics::gauge!("audio_dbspl").set(peaks.dbspl);
        metrics::gauge!("audio_rms").set(peaks.rms);
        metrics::gauge!("audio_spectral_flux").set(peaks.flux);
        metrics::gauge!("ai_confidence").set(peaks.confidence);
    }
    tracing::debug!("Telemetry syncer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_hold_and_reset() {
        let telemetry = Telemetry::new();
        telemetry.update_audio(60.0, 0.1, 2.0);
        telemetry.update_audio(55.0, 0.3, 1.0);
        telemetry.update_ai(0.4);
        telemetry.update_silence(DBSPL_SILENCE_LEVEL, 0.0, 0.0);

        let peaks = telemetry.take_and_reset();
        assert_eq!(peaks.dbspl, 60.0);
        assert_eq!(peaks.rms, 0.3);
        assert_eq!(peaks.flux, 2.0);
        assert_eq!(peaks.confidence, 0.4);

        assert_eq!(telemetry.take_and_reset(), Peaks::default());
    }
}
