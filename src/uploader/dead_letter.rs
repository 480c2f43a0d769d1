//! Offline evidence store.
//!
//! Events that cannot be uploaded are written as
//! `evidence_{uuid}_{label}.wav` plus a JSON sidecar. Both files are written
//! to a temp file in the same directory and renamed into place, so a crash
//! never leaves a half-written WAV behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::audio::encode_wav;
use crate::config::paths;
use crate::domain::{EventObject, EvidenceSidecar};

/// One offline evidence file and its sidecar
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineEvidence {
    pub wav_path: PathBuf,
    pub sidecar_path: PathBuf,
    pub id: Option<Uuid>,
}

impl OfflineEvidence {
    pub fn from_wav(wav_path: PathBuf) -> Self {
        let sidecar_path = wav_path.with_extension("json");
        let id = wav_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(paths::parse_evidence_id);
        Self {
            wav_path,
            sidecar_path,
            id,
        }
    }

    /// Read the sidecar, if present and valid
    pub fn sidecar(&self) -> Option<EvidenceSidecar> {
        let text = std::fs::read_to_string(&self.sidecar_path).ok()?;
        match serde_json::from_str(&text) {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                tracing::warn!("Ignoring bad sidecar {}: {}", self.sidecar_path.display(), e);
                None
            }
        }
    }

    /// Modification time of the WAV, for eviction order
    pub fn modified(&self) -> Option<std::time::SystemTime> {
        std::fs::metadata(&self.wav_path).and_then(|m| m.modified()).ok()
    }

    /// Delete the WAV and its sidecar
    pub fn remove(&self) -> Result<()> {
        std::fs::remove_file(&self.wav_path)
            .with_context(|| format!("Failed to delete {}", self.wav_path.display()))?;
        if self.sidecar_path.exists() {
            std::fs::remove_file(&self.sidecar_path)
                .with_context(|| format!("Failed to delete {}", self.sidecar_path.display()))?;
        }
        Ok(())
    }
}

/// Directory holding offline evidence
#[derive(Debug, Clone)]
pub struct DeadLetterStore {
    dir: PathBuf,
}

impl DeadLetterStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist an event atomically
    pub fn save(&self, event: &EventObject, wav_bytes: &[u8]) -> Result<OfflineEvidence> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let wav_name = paths::evidence_file_name(&event.id, &event.metadata.label);
        let wav_path = self.dir.join(&wav_name);
        let evidence = OfflineEvidence::from_wav(wav_path);

        let sidecar = serde_json::to_vec_pretty(&event.sidecar())?;

        // Sidecar first: a WAV is only ever visible with its metadata next to it
        write_atomic(&self.dir, &evidence.sidecar_path, &sidecar)?;
        write_atomic(&self.dir, &evidence.wav_path, wav_bytes)?;

        Ok(evidence)
    }

    /// Encode and persist an event
    pub fn save_event(&self, event: &EventObject) -> Result<OfflineEvidence> {
        let bytes = encode_wav(&event.audio_samples, event.sample_rate)?;
        self.save(event, &bytes)
    }

    /// All offline evidence, oldest name first
    pub fn list(&self) -> Result<Vec<OfflineEvidence>> {
        let pattern = self.dir.join(paths::EVIDENCE_GLOB);
        let pattern = pattern.to_string_lossy();

        let mut wavs: Vec<PathBuf> = glob::glob(&pattern)
            .context("Invalid evidence glob")?
            .filter_map(|entry| entry.ok())
            .collect();
        wavs.sort();

        Ok(wavs.into_iter().map(OfflineEvidence::from_wav).collect())
    }
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir).context("Failed to create temp file")?;
    tmp.write_all(bytes).context("Failed to write temp file")?;
    tmp.as_file().sync_all().ok();
    tmp.persist(target)
        .with_context(|| format!("Failed to move evidence into {}", target.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventMetadata;
    use chrono::Utc;
    use tempfile::TempDir;

    fn event(label: &str) -> EventObject {
        EventObject {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            duration_seconds: 0.5,
            sample_rate: 8,
            audio_samples: vec![0.1, 0.2, 0.3, 0.4],
            metadata: EventMetadata {
                label: label.to_string(),
                confidence: 0.8,
                calibrated: false,
                peak_dbspl: None,
            },
        }
    }

    #[test]
    fn test_save_and_list() {
        let temp = TempDir::new().unwrap();
        let store = DeadLetterStore::new(temp.path());
        let ev = event("Glass / break");

        let saved = store.save_event(&ev).unwrap();
        assert!(saved.wav_path.exists());
        assert!(saved.sidecar_path.exists());

        let name = saved.wav_path.file_name().unwrap().to_str().unwrap().to_string();
        assert_eq!(name, format!("evidence_{}_Glass___break.wav", ev.id));

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, Some(ev.id));
        assert_eq!(listed[0].sidecar().unwrap().metadata.label, "Glass / break");

        // No temp files left behind
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_remove_deletes_both_files() {
        let temp = TempDir::new().unwrap();
        let store = DeadLetterStore::new(temp.path());
        let saved = store.save_event(&event("Bark")).unwrap();

        saved.remove().unwrap();
        assert!(!saved.wav_path.exists());
        assert!(!saved.sidecar_path.exists());
        assert!(store.list().unwrap().is_empty());
    }
}
