//! Append-only metrics CSV.
//!
//! The recorder pushes rows through a bounded channel; a single writer task
//! appends them. Rotation and heartbeat rows share the same file lock, so a
//! rename never interleaves with a partial write.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex, MutexGuard};

use crate::core::shutdown::Shutdown;
use crate::domain::{MetricsRow, CSV_HEADER};

/// Shared handle to the live metrics CSV
#[derive(Debug, Clone)]
pub struct MetricsCsv {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl MetricsCsv {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hold the file lock (used by rotation)
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Append rows, writing the header first if the file is new
    pub async fn append(&self, rows: &[MetricsRow]) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.append_locked(rows, true).await
    }

    /// Append only when the file already exists. Returns whether it did.
    pub async fn append_if_exists(&self, row: &MetricsRow) -> Result<bool> {
        let _guard = self.lock.lock().await;
        if !self.path.exists() {
            return Ok(false);
        }
        self.append_locked(std::slice::from_ref(row), false).await?;
        Ok(true)
    }

    async fn append_locked(&self, rows: &[MetricsRow], create: bool) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create metrics directory")?;
            }
        }

        let is_new = !self.path.exists();
        if is_new && !create {
            return Ok(());
        }

        let mut text = String::new();
        if is_new {
            text.push_str(CSV_HEADER);
            text.push('\n');
        }
        for row in rows {
            text.push_str(&row.to_csv_line());
            text.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(text.as_bytes())
            .await
            .context("Failed to append metrics rows")?;
        file.flush().await?;
        Ok(())
    }
}

/// Non-blocking producer side used by the pipeline thread
#[derive(Debug, Clone)]
pub struct MetricsLogSender {
    tx: mpsc::Sender<MetricsRow>,
}

impl MetricsLogSender {
    /// Queue a row; drops it (with a warning) when the writer is behind
    pub fn send(&self, row: MetricsRow) {
        match self.tx.try_send(row) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(row)) => {
                tracing::warn!(id = %row.id, "Metrics log queue full, row dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Metrics log writer gone, row dropped");
            }
        }
    }
}

/// Create a bounded row channel
pub fn channel(capacity: usize) -> (MetricsLogSender, mpsc::Receiver<MetricsRow>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MetricsLogSender { tx }, rx)
}

/// Drain rows into the CSV until shutdown, then flush what is queued
pub async fn run_writer(csv: MetricsCsv, mut rx: mpsc::Receiver<MetricsRow>, shutdown: Shutdown) {
    loop {
        let row = tokio::select! {
            row = rx.recv() => row,
            _ = shutdown.triggered() => None,
        };

        let Some(row) = row else {
            break;
        };

        // Batch whatever else is already waiting
        let mut batch = vec![row];
        while let Ok(more) = rx.try_recv() {
            batch.push(more);
        }

        if let Err(e) = csv.append(&batch).await {
            tracing::warn!("Failed to write metrics rows: {:#}", e);
        }
    }

    let mut rest = Vec::new();
    while let Ok(row) = rx.try_recv() {
        rest.push(row);
    }
    if !rest.is_empty() {
        if let Err(e) = csv.append(&rest).await {
            tracing::warn!("Failed to flush metrics rows: {:#}", e);
        }
    }

    tracing::debug!("Metrics writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SystemSnapshot;
    use chrono::Local;
    use tempfile::TempDir;

    fn row(id: &str) -> MetricsRow {
        MetricsRow {
            id: id.to_string(),
            timestamp: Local::now(),
            label: "Bark".to_string(),
            confidence: 0.9,
            rms: 0.1,
            dbspl: 70.0,
            flux: 2.0,
            system: SystemSnapshot::default(),
        }
    }

    #[tokio::test]
    async fn test_header_written_once() {
        let temp = TempDir::new().unwrap();
        let csv = MetricsCsv::new(temp.path().join("metrics_buffer.csv"));

        csv.append(&[row("a")]).await.unwrap();
        csv.append(&[row("b"), row("c")]).await.unwrap();

        let content = std::fs::read_to_string(csv.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[3].starts_with("c,"));
    }

    #[tokio::test]
    async fn test_append_if_exists_skips_missing_file() {
        let temp = TempDir::new().unwrap();
        let csv = MetricsCsv::new(temp.path().join("metrics_buffer.csv"));

        assert!(!csv.append_if_exists(&row("hb")).await.unwrap());
        assert!(!csv.path().exists());

        csv.append(&[row("a")]).await.unwrap();
        assert!(csv.append_if_exists(&row("hb")).await.unwrap());
    }

    #[tokio::test]
    async fn test_writer_flushes_on_shutdown() {
        let temp = TempDir::new().unwrap();
        let csv = MetricsCsv::new(temp.path().join("metrics_buffer.csv"));
        let (sender, rx) = channel(16);
        let (trigger, shutdown) = crate::core::shutdown::channel();

        sender.send(row("a"));
        sender.send(row("b"));
        let task = tokio::spawn(run_writer(csv.clone(), rx, shutdown));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        trigger.trigger();
        task.await.unwrap();

        let content = std::fs::read_to_string(csv.path()).unwrap();
        assert_eq!(content.lines().count(), 3);
    }
}
