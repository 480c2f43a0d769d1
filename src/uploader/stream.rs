//! Stream worker: uploads recordings as they leave the pipeline.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::instrument;

use super::dead_letter::DeadLetterStore;
use super::UploadError;
use crate::adapters::{Notifier, ObjectStore, WAV_CONTENT_TYPE};
use crate::audio::encode_wav;
use crate::config::paths;
use crate::core::shutdown::Shutdown;
use crate::domain::{upload_metadata, EventObject};

/// How one event was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Uploaded,
    DeadLettered,
    /// Could not be uploaded or saved
    Lost,
}

pub struct StreamUploader {
    store: Option<Arc<dyn ObjectStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    dead_letter: DeadLetterStore,
}

impl StreamUploader {
    /// `store` is `None` when uploads are offline
    pub fn new(
        store: Option<Arc<dyn ObjectStore>>,
        notifier: Option<Arc<dyn Notifier>>,
        dead_letter: DeadLetterStore,
    ) -> Self {
        Self {
            store,
            notifier,
            dead_letter,
        }
    }

    pub fn is_online(&self) -> bool {
        self.store.is_some()
    }

    #[instrument(skip(self, event), fields(id = %event.id, label = %event.metadata.label))]
    pub async fn handle(&self, event: EventObject) -> StreamOutcome {
        let bytes = match encode_wav(&event.audio_samples, event.sample_rate) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to encode recording, event lost: {:#}", e);
                return StreamOutcome::Lost;
            }
        };

        match self.upload(&event, bytes.clone()).await {
            Ok(()) => {
                tracing::info!("Uploaded evidence ({:.1}s)", event.duration_seconds);
                self.notify_uploaded(&event).await;
                StreamOutcome::Uploaded
            }
            Err(e) => {
                if !matches!(e, UploadError::Offline) {
                    tracing::warn!("Upload failed, saving offline: {}", e);
                }
                self.dead_letter_event(&event, &bytes)
            }
        }
    }

    async fn upload(&self, event: &EventObject, bytes: Vec<u8>) -> Result<(), UploadError> {
        let store = self.store.as_ref().ok_or(UploadError::Offline)?;
        let key = paths::evidence_key(&event.id);
        let metadata = upload_metadata(&event.id, &event.timestamp, &event.metadata);

        store
            .put(&key, bytes, WAV_CONTENT_TYPE, &metadata)
            .await
            .map_err(|e| UploadError::Store(format!("{:#}", e)))
    }

    fn dead_letter_event(&self, event: &EventObject, bytes: &[u8]) -> StreamOutcome {
        match self.dead_letter.save(event, bytes) {
            Ok(saved) => {
                tracing::info!("Saved offline evidence {}", saved.wav_path.display());
                StreamOutcome::DeadLettered
            }
            Err(e) => {
                tracing::error!("Failed to save offline evidence, event lost: {:#}", e);
                StreamOutcome::Lost
            }
        }
    }

    async fn notify_uploaded(&self, event: &EventObject) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(e) = notifier.notify(&upload_notification(event)).await {
            tracing::warn!("Failed to send upload notification via {}: {:#}", notifier.name(), e);
        }
    }

    /// Consume events until shutdown; anything still queued is saved offline
    pub async fn run(self, mut rx: mpsc::Receiver<EventObject>, shutdown: Shutdown) {
        loop {
            let event = tokio::select! {
                event = rx.recv() => event,
                _ = shutdown.triggered() => None,
            };
            let Some(event) = event else {
                break;
            };
            self.handle(event).await;
        }

        rx.close();
        while let Ok(event) = rx.try_recv() {
            match encode_wav(&event.audio_samples, event.sample_rate) {
                Ok(bytes) => {
                    self.dead_letter_event(&event, &bytes);
                }
                Err(e) => tracing::error!(id = %event.id, "Failed to encode queued event: {:#}", e),
            }
        }

        tracing::debug!("Stream uploader stopped");
    }
}

/// Text sent after a successful upload
pub fn upload_notification(event: &EventObject) -> String {
    let meta = &event.metadata;
    let mut text = format!(
        "Evidence uploaded: {} ({:.0}%), {:.1}s",
        meta.label,
        meta.confidence * 100.0,
        event.duration_seconds
    );
    if meta.calibrated {
        if let Some(peak) = meta.peak_dbspl {
            text.push_str(&format!(", peak {:.1} dB SPL", peak));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventMetadata;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_notification_text() {
        let event = EventObject {
            id: Uuid::nil(),
            timestamp: Utc::now(),
            duration_seconds: 12.34,
            sample_rate: 16000,
            audio_samples: vec![],
            metadata: EventMetadata {
                label: "Glass".to_string(),
                confidence: 0.876,
                calibrated: true,
                peak_dbspl: Some(91.26),
            },
        };
        assert_eq!(
            upload_notification(&event),
            "Evidence uploaded: Glass (88%), 12.3s, peak 91.3 dB SPL"
        );
    }
}
