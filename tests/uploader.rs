//! Uploader integration tests
//!
//! Stream, retry, batch and disk-guard workers against an in-memory object
//! store and a fake disk, using real files in a temp directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Local, Utc};
use filetime::FileTime;
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

use acoustic_monitor::adapters::{Notifier, ObjectStore};
use acoustic_monitor::core::shutdown;
use acoustic_monitor::domain::{EventMetadata, EventObject, MetricsRow, SystemSnapshot};
use acoustic_monitor::uploader::{
    retry_pass, BatchUploader, DeadLetterStore, DiskGuard, DiskUsage, MetricsCsv, RotationPolicy,
    StreamOutcome, StreamUploader,
};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Debug, Clone)]
struct Put {
    key: String,
    len: usize,
    metadata: Vec<(String, String)>,
}

/// Records every put; fails keys containing any of `failing`
#[derive(Default)]
struct MemoryStore {
    puts: Mutex<Vec<Put>>,
    failing: Mutex<Vec<String>>,
}

impl MemoryStore {
    fn failing_on(pattern: &str) -> Self {
        let store = Self::default();
        store.failing.lock().unwrap().push(pattern.to_string());
        store
    }

    fn puts(&self) -> Vec<Put> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
        metadata: &[(String, String)],
    ) -> Result<()> {
        if self.failing.lock().unwrap().iter().any(|p| key.contains(p.as_str())) {
            anyhow::bail!("503 Service Unavailable");
        }
        self.puts.lock().unwrap().push(Put {
            key: key.to_string(),
            len: bytes.len(),
            metadata: metadata.to_vec(),
        });
        Ok(())
    }
}

#[derive(Default)]
struct CollectNotifier {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for CollectNotifier {
    fn name(&self) -> &str {
        "collect"
    }

    async fn notify(&self, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Usage grows by `per_file` for each evidence WAV in the directory
struct FileCountUsage {
    base: f64,
    per_file: f64,
}

impl DiskUsage for FileCountUsage {
    fn usage_percent(&self, path: &Path) -> Result<f64> {
        let wavs = std::fs::read_dir(path)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "wav"))
            .count();
        Ok(self.base + self.per_file * wavs as f64)
    }
}

fn event(label: &str) -> EventObject {
    EventObject {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        duration_seconds: 0.5,
        sample_rate: 16,
        audio_samples: vec![0.25; 8],
        metadata: EventMetadata {
            label: label.to_string(),
            confidence: 0.82,
            calibrated: false,
            peak_dbspl: None,
        },
    }
}

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

fn names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .collect()
}

// ============================================================================
// Stream worker
// ============================================================================

#[tokio::test]
async fn test_stream_upload_notifies_and_keeps_nothing_locally() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::default());
    let notifier = Arc::new(CollectNotifier::default());
    let dead_letter = DeadLetterStore::new(temp.path());
    let uploader = StreamUploader::new(
        Some(store.clone() as Arc<dyn ObjectStore>),
        Some(notifier.clone() as Arc<dyn Notifier>),
        dead_letter.clone(),
    );

    let ev = event("Bark");
    assert_eq!(uploader.handle(ev.clone()).await, StreamOutcome::Uploaded);

    let puts = store.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].key, format!("recordings/evidence_{}.wav", ev.id));
    assert!(puts[0].metadata.contains(&("label".to_string(), "Bark".to_string())));
    assert!(puts[0].metadata.contains(&("uuid".to_string(), ev.id.to_string())));

    let sent = notifier.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("Evidence uploaded: Bark (82%)"));

    assert!(dead_letter.list().unwrap().is_empty());
}

#[tokio::test]
async fn test_stream_failure_dead_letters_without_notification() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::failing_on("recordings/"));
    let notifier = Arc::new(CollectNotifier::default());
    let dead_letter = DeadLetterStore::new(temp.path());
    let uploader = StreamUploader::new(
        Some(store.clone() as Arc<dyn ObjectStore>),
        Some(notifier.clone() as Arc<dyn Notifier>),
        dead_letter.clone(),
    );

    let ev = event("Glass");
    assert_eq!(uploader.handle(ev.clone()).await, StreamOutcome::DeadLettered);

    let saved = dead_letter.list().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].id, Some(ev.id));
    assert!(saved[0].sidecar_path.exists());
    assert_eq!(saved[0].sidecar().unwrap().metadata.label, "Glass");
    assert!(notifier.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stream_offline_saves_queued_events_on_shutdown() {
    let temp = TempDir::new().unwrap();
    let dead_letter = DeadLetterStore::new(temp.path());
    let uploader = StreamUploader::new(None, None, dead_letter.clone());
    assert!(!uploader.is_online());

    let (tx, rx) = mpsc::channel(4);
    tx.send(event("Bark")).await.unwrap();
    tx.send(event("Siren")).await.unwrap();

    let (trigger, signal) = shutdown::channel();
    trigger.trigger();
    uploader.run(rx, signal).await;

    let saved = dead_letter.list().unwrap();
    assert_eq!(saved.len(), 2);
    let labels: Vec<String> = saved
        .iter()
        .filter_map(|e| e.sidecar())
        .map(|s| s.metadata.label)
        .collect();
    assert!(labels.contains(&"Bark".to_string()));
    assert!(labels.contains(&"Siren".to_string()));
}

// ============================================================================
// Retry worker
// ============================================================================

#[tokio::test]
async fn test_retry_deletes_only_after_successful_upload() {
    let temp = TempDir::new().unwrap();
    let dead_letter = DeadLetterStore::new(temp.path());

    let good = event("Bark");
    let bad = event("Glass");
    dead_letter.save_event(&good).unwrap();
    let kept = dead_letter.save_event(&bad).unwrap();
    let kept_bytes = std::fs::read(&kept.wav_path).unwrap();

    let store = MemoryStore::failing_on(&bad.id.to_string());
    let report = retry_pass(&store, &dead_letter, None).await.unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.failed, 1);

    let puts = store.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].key, format!("recordings/evidence_{}.wav", good.id));
    assert!(puts[0].metadata.contains(&("label".to_string(), "Bark".to_string())));

    // The failed file is untouched, sidecar included
    let remaining = dead_letter.list().unwrap();
    assert_eq!(remaining, vec![kept.clone()]);
    assert_eq!(std::fs::read(&kept.wav_path).unwrap(), kept_bytes);
    assert!(kept.sidecar_path.exists());
}

#[tokio::test]
async fn test_retry_without_sidecar_uses_file_name() {
    let temp = TempDir::new().unwrap();
    let dead_letter = DeadLetterStore::new(temp.path());

    let ev = event("Bark");
    let saved = dead_letter.save_event(&ev).unwrap();
    std::fs::remove_file(&saved.sidecar_path).unwrap();

    let store = MemoryStore::default();
    let report = retry_pass(&store, &dead_letter, None).await.unwrap();
    assert_eq!(report.uploaded, 1);

    let puts = store.puts();
    assert_eq!(puts[0].key, format!("recordings/evidence_{}.wav", ev.id));
    assert!(puts[0].metadata.is_empty());
    assert!(puts[0].len > 44);
    assert!(!saved.wav_path.exists());
}

#[tokio::test]
async fn test_retry_stops_when_shutdown_requested() {
    let temp = TempDir::new().unwrap();
    let dead_letter = DeadLetterStore::new(temp.path());
    dead_letter.save_event(&event("Bark")).unwrap();

    let (trigger, signal) = shutdown::channel();
    trigger.trigger();

    let store = MemoryStore::default();
    let report = retry_pass(&store, &dead_letter, Some(&signal)).await.unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(dead_letter.list().unwrap().len(), 1);
}

// ============================================================================
// Batch worker
// ============================================================================

#[tokio::test]
async fn test_rotation_then_upload_removes_rotated_file() {
    let temp = TempDir::new().unwrap();
    let csv = MetricsCsv::new(temp.path().join("metrics_buffer.csv"));
    csv.append(&[row("a"), row("b")]).await.unwrap();

    let store = Arc::new(MemoryStore::default());
    let policy = RotationPolicy {
        max_bytes: Some(10),
        max_age: None,
    };
    let mut batch = BatchUploader::new(csv.clone(), policy, Some(store.clone() as Arc<dyn ObjectStore>));

    let rotated = batch.rotate_if_needed(Instant::now()).await.unwrap().unwrap();
    assert!(!csv.path().exists());
    assert!(rotated.exists());

    // New rows start a fresh live file, which is never a batch candidate
    csv.append(&[row("c")]).await.unwrap();
    assert_eq!(batch.pending().unwrap(), vec![rotated.clone()]);

    assert_eq!(batch.upload_pending().await.unwrap(), 1);
    assert!(!rotated.exists());
    assert!(csv.path().exists());

    let puts = store.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].key, format!("metrics/{}", names(&[rotated])[0]));
}

#[tokio::test]
async fn test_back_to_back_rotations_keep_both_files() {
    let temp = TempDir::new().unwrap();
    let csv = MetricsCsv::new(temp.path().join("metrics_buffer.csv"));
    let policy = RotationPolicy {
        max_bytes: Some(10),
        max_age: None,
    };
    let mut batch = BatchUploader::new(csv.clone(), policy, None);

    csv.append(&[row("a"), row("b")]).await.unwrap();
    let first = batch.rotate_if_needed(Instant::now()).await.unwrap().unwrap();
    csv.append(&[row("c"), row("d")]).await.unwrap();
    let second = batch.rotate_if_needed(Instant::now()).await.unwrap().unwrap();

    assert_ne!(first, second);
    let ids = |path: &Path| -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .skip(1)
            .filter_map(|line| line.split(',').next().map(str::to_string))
            .collect()
    };
    assert_eq!(ids(&first), vec!["a", "b"]);
    assert_eq!(ids(&second), vec!["c", "d"]);
    assert_eq!(batch.pending().unwrap().len(), 2);
}

#[tokio::test]
async fn test_small_file_is_not_rotated() {
    let temp = TempDir::new().unwrap();
    let csv = MetricsCsv::new(temp.path().join("metrics_buffer.csv"));
    csv.append(&[row("a")]).await.unwrap();

    let mut batch = BatchUploader::new(csv.clone(), RotationPolicy::default(), None);
    assert!(batch.rotate_if_needed(Instant::now()).await.unwrap().is_none());
    assert!(csv.path().exists());

    // Age counts from the last rotation, here construction
    let later = Instant::now() + Duration::from_secs(25 * 3600);
    assert!(batch.rotate_if_needed(later).await.unwrap().is_some());
}

#[tokio::test]
async fn test_failed_batch_upload_keeps_file() {
    let temp = TempDir::new().unwrap();
    let csv = MetricsCsv::new(temp.path().join("metrics_buffer.csv"));
    let leftover = temp.path().join("metrics_20260101_000000.csv");
    std::fs::write(&leftover, "id,timestamp\n").unwrap();

    let store = Arc::new(MemoryStore::failing_on("metrics/"));
    let batch = BatchUploader::new(csv, RotationPolicy::default(), Some(store as Arc<dyn ObjectStore>));

    assert_eq!(batch.upload_pending().await.unwrap(), 0);
    assert!(leftover.exists());
}

#[tokio::test]
async fn test_offline_batch_keeps_rotated_files() {
    let temp = TempDir::new().unwrap();
    let csv = MetricsCsv::new(temp.path().join("metrics_buffer.csv"));
    let leftover = temp.path().join("metrics_20260101_000000.csv");
    std::fs::write(&leftover, "id,timestamp\n").unwrap();

    let batch = BatchUploader::new(csv, RotationPolicy::default(), None);
    assert_eq!(batch.upload_pending().await.unwrap(), 0);
    assert_eq!(names(&batch.pending().unwrap()), vec!["metrics_20260101_000000.csv"]);
}

// ============================================================================
// Disk guard
// ============================================================================

fn backdate(path: &Path, secs_ago: u64) {
    let at = SystemTime::now() - Duration::from_secs(secs_ago);
    filetime::set_file_mtime(path, FileTime::from_system_time(at)).unwrap();
}

#[test]
fn test_disk_guard_evicts_oldest_first() {
    let temp = TempDir::new().unwrap();
    let dead_letter = DeadLetterStore::new(temp.path());

    let newest = dead_letter.save_event(&event("Bark")).unwrap();
    let middle = dead_letter.save_event(&event("Siren")).unwrap();
    let oldest = dead_letter.save_event(&event("Glass")).unwrap();
    backdate(&newest.wav_path, 60);
    backdate(&middle.wav_path, 3600);
    backdate(&oldest.wav_path, 86_400);

    // 3 files: 105%, 2 files: 95%, 1 file: 85%
    let usage = FileCountUsage {
        base: 75.0,
        per_file: 10.0,
    };
    let guard = DiskGuard::new(dead_letter.clone(), usage, 90.0);

    assert_eq!(guard.enforce().unwrap(), 2);
    assert!(!oldest.wav_path.exists());
    assert!(!oldest.sidecar_path.exists());
    assert!(!middle.wav_path.exists());
    assert_eq!(dead_letter.list().unwrap(), vec![newest]);
}

#[test]
fn test_disk_guard_below_threshold_keeps_everything() {
    let temp = TempDir::new().unwrap();
    let dead_letter = DeadLetterStore::new(temp.path());
    dead_letter.save_event(&event("Bark")).unwrap();
    dead_letter.save_event(&event("Siren")).unwrap();

    let usage = FileCountUsage {
        base: 70.0,
        per_file: 10.0,
    };
    let guard = DiskGuard::new(dead_letter.clone(), usage, 90.0);

    assert_eq!(guard.enforce().unwrap(), 0);
    assert_eq!(dead_letter.list().unwrap().len(), 2);
}
