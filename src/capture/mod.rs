//! Audio capture sources.
//!
//! The pipeline pulls fixed-size mono chunks from an [`AudioSource`]. The
//! shipped source replays WAV files; live device capture plugs in through the
//! same trait.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use crate::audio::{read_wav_mono, resample};

/// A pull-based source of mono audio chunks
pub trait AudioSource: Send {
    /// Sample rate of every chunk this source yields
    fn sample_rate(&self) -> u32;

    /// Next chunk, or `None` once the stream has ended
    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>>;
}

// ============================================================================
// WAV replay
// ============================================================================

/// Replays one WAV file, or every `*.wav` in a directory in name order
pub struct WavFileSource {
    files: VecDeque<PathBuf>,
    sample_rate: u32,
    chunk_size: usize,
    realtime: bool,
    pending: VecDeque<f32>,
    next_due: Option<Instant>,
}

impl WavFileSource {
    pub fn open(path: &Path, sample_rate: u32, chunk_size: usize, realtime: bool) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be greater than zero");
        }

        let files: VecDeque<PathBuf> = if path.is_dir() {
            let pattern = path.join("*.wav");
            let pattern = pattern.to_string_lossy();
            let mut found: Vec<PathBuf> = glob::glob(&pattern)
                .context("Invalid input glob")?
                .filter_map(|entry| entry.ok())
                .collect();
            found.sort();
            found.into()
        } else if path.exists() {
            VecDeque::from(vec![path.to_path_buf()])
        } else {
            bail!("Input not found: {}", path.display());
        };

        if files.is_empty() {
            bail!("No WAV files in {}", path.display());
        }

        Ok(Self {
            files,
            sample_rate,
            chunk_size,
            realtime,
            pending: VecDeque::new(),
            next_due: None,
        })
    }

    fn load_next_file(&mut self) -> Result<bool> {
        let Some(path) = self.files.pop_front() else {
            return Ok(false);
        };

        let decoded = read_wav_mono(&path)?;
        let samples = if decoded.sample_rate != self.sample_rate {
            tracing::debug!(
                "Resampling {} from {} Hz to {} Hz",
                path.display(),
                decoded.sample_rate,
                self.sample_rate
            );
            resample(&decoded.samples, decoded.sample_rate, self.sample_rate)?
        } else {
            decoded.samples
        };

        tracing::info!("Replaying {} ({} samples)", path.display(), samples.len());
        self.pending.extend(samples);
        Ok(true)
    }

    fn pace(&mut self) {
        if !self.realtime {
            return;
        }
        let period = Duration::from_secs_f64(self.chunk_size as f64 / self.sample_rate as f64);
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + period);
    }
}

impl AudioSource for WavFileSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        while self.pending.len() < self.chunk_size {
            if !self.load_next_file()? {
                break;
            }
        }

        if self.pending.is_empty() {
            return Ok(None);
        }

        // Short final chunk is zero-padded
        let take = self.chunk_size.min(self.pending.len());
        let mut chunk: Vec<f32> = self.pending.drain(..take).collect();
        chunk.resize(self.chunk_size, 0.0);

        self.pace();
        Ok(Some(chunk))
    }
}

// ============================================================================
// In-memory source
// ============================================================================

/// Yields a prepared list of chunks, then ends
pub struct MemorySource {
    sample_rate: u32,
    chunks: VecDeque<Vec<f32>>,
}

impl MemorySource {
    pub fn new(sample_rate: u32, chunks: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            chunks: chunks.into(),
        }
    }
}

impl AudioSource for MemorySource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        Ok(self.chunks.pop_front())
    }
}
