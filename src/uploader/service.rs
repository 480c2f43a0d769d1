//! Spawns the uploader workers on the current tokio runtime.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::batch::{BatchUploader, RotationPolicy};
use super::dead_letter::DeadLetterStore;
use super::disk_guard::{DiskGuard, Fs2DiskUsage};
use super::metrics_log::{self, MetricsCsv};
use super::retry::run_retry_worker;
use super::stream::StreamUploader;
use crate::adapters::{Notifier, ObjectStore};
use crate::config::paths;
use crate::core::shutdown::Shutdown;
use crate::domain::{EventObject, MetricsRow};

/// Resolved uploader settings
#[derive(Debug, Clone)]
pub struct UploaderSettings {
    pub output_dir: PathBuf,
    pub rotation: RotationPolicy,
    pub retry_interval: Duration,
    pub csv_check_interval: Duration,
    pub disk_check_interval: Duration,
    pub disk_threshold_percent: f64,
}

impl UploaderSettings {
    pub fn metrics_csv(&self) -> MetricsCsv {
        MetricsCsv::new(self.output_dir.join(paths::METRICS_BUFFER_FILE))
    }

    pub fn dead_letter(&self) -> DeadLetterStore {
        DeadLetterStore::new(&self.output_dir)
    }
}

/// Join handles of the spawned workers
pub struct UploaderHandles {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl UploaderHandles {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every worker to finish
    pub async fn join(self) {
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("Uploader worker {} panicked: {}", name, e);
            }
        }
    }
}

pub struct UploaderService {
    settings: UploaderSettings,
    store: Option<Arc<dyn ObjectStore>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl UploaderService {
    /// `store` is `None` when uploads are offline
    pub fn new(
        settings: UploaderSettings,
        store: Option<Arc<dyn ObjectStore>>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            settings,
            store,
            notifier,
        }
    }

    /// Start the stream, retry, batch, disk-guard and metrics-log workers
    pub fn spawn(
        self,
        events: mpsc::Receiver<EventObject>,
        metrics: mpsc::Receiver<MetricsRow>,
        shutdown: Shutdown,
    ) -> UploaderHandles {
        let settings = self.settings;
        let dead_letter = settings.dead_letter();
        let csv = settings.metrics_csv();
        let mut tasks = Vec::new();

        tracing::info!(
            online = self.store.is_some(),
            dir = %settings.output_dir.display(),
            "Starting uploader"
        );

        let stream = StreamUploader::new(self.store.clone(), self.notifier, dead_letter.clone());
        tasks.push(("stream", tokio::spawn(stream.run(events, shutdown.clone()))));

        tasks.push((
            "metrics-log",
            tokio::spawn(metrics_log::run_writer(csv.clone(), metrics, shutdown.clone())),
        ));

        if let Some(store) = self.store.clone() {
            tasks.push((
                "retry",
                tokio::spawn(run_retry_worker(
                    store,
                    dead_letter.clone(),
                    settings.retry_interval,
                    shutdown.clone(),
                )),
            ));
        }

        let batch = BatchUploader::new(csv, settings.rotation, self.store);
        tasks.push((
            "batch",
            tokio::spawn(batch.run(settings.csv_check_interval, shutdown.clone())),
        ));

        let guard = DiskGuard::new(dead_letter, Fs2DiskUsage, settings.disk_threshold_percent);
        tasks.push((
            "disk-guard",
            tokio::spawn(guard.run(settings.disk_check_interval, shutdown)),
        ));

        UploaderHandles { tasks }
    }
}
