//! Retry worker: re-uploads offline evidence.
//!
//! Files are deleted only after the store confirms the upload. A failed file
//! is left untouched and the pass moves on to the next one.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::instrument;

use super::dead_letter::{DeadLetterStore, OfflineEvidence};
use crate::adapters::{ObjectStore, WAV_CONTENT_TYPE};
use crate::config::paths;
use crate::core::shutdown::Shutdown;

/// Counts from one retry pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub uploaded: usize,
    pub failed: usize,
}

/// Upload every offline evidence file once
pub async fn retry_pass(
    store: &dyn ObjectStore,
    dead_letter: &DeadLetterStore,
    shutdown: Option<&Shutdown>,
) -> Result<RetryReport> {
    let pending = dead_letter.list()?;
    let mut report = RetryReport::default();

    if !pending.is_empty() {
        tracing::info!("Retrying {} offline evidence files", pending.len());
    }

    for evidence in pending {
        if shutdown.is_some_and(|s| s.is_triggered()) {
            break;
        }

        report.attempted += 1;
        match retry_one(store, &evidence).await {
            Ok(()) => report.uploaded += 1,
            Err(e) => {
                tracing::warn!("Retry failed for {}: {:#}", evidence.wav_path.display(), e);
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

#[instrument(skip(store, evidence), fields(file = %evidence.wav_path.display()))]
async fn retry_one(store: &dyn ObjectStore, evidence: &OfflineEvidence) -> Result<()> {
    let bytes = tokio::fs::read(&evidence.wav_path)
        .await
        .context("Failed to read evidence")?;

    let sidecar = evidence.sidecar();
    let id = sidecar.as_ref().map(|s| s.id).or(evidence.id);

    let key = match id {
        Some(id) => paths::evidence_key(&id),
        None => {
            let name = evidence
                .wav_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            format!("recordings/{}", name)
        }
    };
    let metadata = sidecar.map(|s| s.upload_metadata()).unwrap_or_default();

    store.put(&key, bytes, WAV_CONTENT_TYPE, &metadata).await?;

    evidence.remove()?;
    tracing::info!("Uploaded offline evidence as {}", key);
    Ok(())
}

/// Run retry passes every `interval` while online
pub async fn run_retry_worker(
    store: Arc<dyn ObjectStore>,
    dead_letter: DeadLetterStore,
    interval: Duration,
    shutdown: Shutdown,
) {
    while !shutdown.wait(interval).await {
        match retry_pass(store.as_ref(), &dead_letter, Some(&shutdown)).await {
            Ok(report) if report.attempted > 0 => tracing::info!(
                "Retry pass: {} uploaded, {} failed",
                report.uploaded,
                report.failed
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!("Retry pass failed: {:#}", e),
        }
    }
    tracing::debug!("Retry worker stopped");
}
