//! Disk-pressure guard.
//!
//! When the output volume fills past the threshold, the oldest offline
//! evidence (by modification time) is deleted until usage drops below it.
//! Losing old evidence beats losing the ability to record new evidence.

use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};

use super::dead_letter::DeadLetterStore;
use crate::core::shutdown::Shutdown;

/// Source of disk usage figures
pub trait DiskUsage: Send + Sync {
    /// Used space of the volume holding `path`, in percent
    fn usage_percent(&self, path: &Path) -> Result<f64>;
}

/// Real volume statistics via `fs2`
#[derive(Debug, Clone, Copy, Default)]
pub struct Fs2DiskUsage;

impl DiskUsage for Fs2DiskUsage {
    fn usage_percent(&self, path: &Path) -> Result<f64> {
        let total = fs2::total_space(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        let available = fs2::available_space(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        Ok(used_percent(total, available))
    }
}

pub fn used_percent(total: u64, available: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    total.saturating_sub(available) as f64 / total as f64 * 100.0
}

pub struct DiskGuard<U: DiskUsage> {
    store: DeadLetterStore,
    usage: U,
    threshold_percent: f64,
}

impl<U: DiskUsage> DiskGuard<U> {
    pub fn new(store: DeadLetterStore, usage: U, threshold_percent: f64) -> Self {
        Self {
            store,
            usage,
            threshold_percent,
        }
    }

    /// Evict oldest evidence while over the threshold. Returns files removed.
    pub fn enforce(&self) -> Result<usize> {
        let dir = self.store.dir();
        if !dir.exists() {
            return Ok(0);
        }

        let mut usage = self.usage.usage_percent(dir)?;
        if usage <= self.threshold_percent {
            return Ok(0);
        }

        tracing::warn!(
            "Disk usage {:.1}% above {:.1}%, evicting old evidence",
            usage,
            self.threshold_percent
        );

        let mut evidence = self.store.list()?;
        evidence.sort_by_key(|e| e.modified().unwrap_or(SystemTime::UNIX_EPOCH));

        let mut removed = 0;
        for item in evidence {
            if usage < self.threshold_percent {
                break;
            }
            match item.remove() {
                Ok(()) => {
                    removed += 1;
                    tracing::error!("Disk full: evicted {}", item.wav_path.display());
                }
                Err(e) => tracing::warn!("Failed to evict {}: {:#}", item.wav_path.display(), e),
            }
            usage = self.usage.usage_percent(dir)?;
        }

        if usage >= self.threshold_percent {
            tracing::error!("Disk usage still {:.1}% after eviction", usage);
        }
        Ok(removed)
    }

    /// Enforce once now, then every `interval` until shutdown
    pub async fn run(self, interval: Duration, shutdown: Shutdown) {
        loop {
            if let Err(e) = self.enforce() {
                tracing::warn!("Disk check failed: {:#}", e);
            }
            if shutdown.wait(interval).await {
                break;
            }
        }
        tracing::debug!("Disk guard stopped");
    }
}
