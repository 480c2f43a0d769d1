//! Batch worker: rotates the metrics CSV and uploads rotated files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use super::metrics_log::MetricsCsv;
use crate::adapters::{ObjectStore, CSV_CONTENT_TYPE};
use crate::config::paths;
use crate::core::shutdown::Shutdown;

/// When the live CSV is rotated. At least one limit must be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: Option<u64>,
    pub max_age: Option<Duration>,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: Some(1024 * 1024),
            max_age: Some(Duration::from_secs(24 * 3600)),
        }
    }
}

/// Rotate when the file is larger or older than allowed
pub fn should_rotate(size_bytes: u64, age: Duration, policy: &RotationPolicy) -> bool {
    policy.max_bytes.is_some_and(|max| size_bytes > max)
        || policy.max_age.is_some_and(|max| age > max)
}

pub struct BatchUploader {
    csv: MetricsCsv,
    policy: RotationPolicy,
    store: Option<Arc<dyn ObjectStore>>,
    last_rotation: Instant,
}

impl BatchUploader {
    pub fn new(csv: MetricsCsv, policy: RotationPolicy, store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self {
            csv,
            policy,
            store,
            last_rotation: Instant::now(),
        }
    }

    fn dir(&self) -> PathBuf {
        self.csv
            .path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Rotate the live CSV if a threshold is exceeded. Returns the new path.
    pub async fn rotate_if_needed(&mut self, now: Instant) -> Result<Option<PathBuf>> {
        let Ok(meta) = tokio::fs::metadata(self.csv.path()).await else {
            return Ok(None);
        };

        let age = now.saturating_duration_since(self.last_rotation);
        if !should_rotate(meta.len(), age, &self.policy) {
            return Ok(None);
        }

        let rotated = {
            let _guard = self.csv.lock().await;
            let rotated = self.free_rotation_target(&Local::now()).await;
            tokio::fs::rename(self.csv.path(), &rotated)
                .await
                .with_context(|| format!("Failed to rotate {}", self.csv.path().display()))?;
            rotated
        };
        self.last_rotation = now;

        tracing::info!("Rotated metrics to {} ({} bytes)", rotated.display(), meta.len());
        Ok(Some(rotated))
    }

    /// First rotation name at `at` not held by a pending file
    async fn free_rotation_target(&self, at: &DateTime<Local>) -> PathBuf {
        let dir = self.dir();
        let mut seq = 0;
        loop {
            let candidate = dir.join(paths::rotated_metrics_name(at, seq));
            if !matches!(tokio::fs::try_exists(&candidate).await, Ok(true)) {
                return candidate;
            }
            seq += 1;
        }
    }

    /// Rotated files waiting for upload
    pub fn pending(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.dir().join(paths::ROTATED_METRICS_GLOB);
        let pattern = pattern.to_string_lossy();

        let mut files: Vec<PathBuf> = glob::glob(&pattern)
            .context("Invalid metrics glob")?
            .filter_map(|entry| entry.ok())
            .filter(|p| p.as_path() != self.csv.path())
            .filter(|p| p.file_name().is_some_and(|n| n != paths::METRICS_BUFFER_FILE))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Upload pending rotated files, deleting each only on success
    pub async fn upload_pending(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let mut uploaded = 0;
        for path in self.pending()? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let key = paths::metrics_key(&name);

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                    continue;
                }
            };

            match store.put(&key, bytes, CSV_CONTENT_TYPE, &[]).await {
                Ok(()) => {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        tracing::warn!("Uploaded {} but failed to delete it: {}", name, e);
                    } else {
                        tracing::info!("Uploaded metrics batch {}", name);
                        uploaded += 1;
                    }
                }
                Err(e) => tracing::warn!("Failed to upload {}: {:#}", name, e),
            }
        }
        Ok(uploaded)
    }

    /// Check every `interval` until shutdown
    pub async fn run(mut self, interval: Duration, shutdown: Shutdown) {
        while !shutdown.wait(interval).await {
            if let Err(e) = self.rotate_if_needed(Instant::now()).await {
                tracing::warn!("Metrics rotation failed: {:#}", e);
            }
            if let Err(e) = self.upload_pending().await {
                tracing::warn!("Metrics upload failed: {:#}", e);
            }
        }
        tracing::debug!("Batch uploader stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_rotate_thresholds_are_strict() {
        let policy = RotationPolicy {
            max_bytes: Some(100),
            max_age: Some(Duration::from_secs(60)),
        };
        assert!(!should_rotate(100, Duration::from_secs(60), &policy));
        assert!(should_rotate(101, Duration::ZERO, &policy));
        assert!(should_rotate(0, Duration::from_secs(61), &policy));
    }

    #[test]
    fn test_single_threshold() {
        let size_only = RotationPolicy {
            max_bytes: Some(10),
            max_age: None,
        };
        assert!(!should_rotate(5, Duration::from_secs(1_000_000), &size_only));
        assert!(should_rotate(11, Duration::ZERO, &size_only));
    }

    #[tokio::test]
    async fn test_rotation_target_skips_taken_names() {
        use chrono::TimeZone;

        let temp = tempfile::TempDir::new().unwrap();
        let csv = MetricsCsv::new(temp.path().join(paths::METRICS_BUFFER_FILE));
        let batch = BatchUploader::new(csv, RotationPolicy::default(), None);
        let at = Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();

        let first = batch.free_rotation_target(&at).await;
        assert_eq!(first, temp.path().join("metrics_20260304_050607.csv"));

        std::fs::write(&first, "pending").unwrap();
        std::fs::write(temp.path().join("metrics_20260304_050607_1.csv"), "pending").unwrap();
        let third = batch.free_rotation_target(&at).await;
        assert_eq!(third, temp.path().join("metrics_20260304_050607_2.csv"));
    }
}
