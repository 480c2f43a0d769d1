//! Per-cycle shared context passed through every pipeline stage.
//!
//! The context is owned by the pipeline thread and handed to each stage by
//! `&mut`. Upstream stages write (label, metrics), downstream stages read
//! (policy, recorder). Data that leaves the pipeline thread is copied into an
//! immutable [`EventObject`](super::EventObject).

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use super::action::ActionTag;

/// One chunk of mono audio. Shared between the pre-roll ring and the
/// recording buffer without copying.
pub type Chunk = Arc<[f32]>;

/// Label written when the activity gate decides a chunk is silence
pub const SILENCE_LABEL: &str = "Silence";

/// Label used when the classifier returns an index outside the class map
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Metric keys published by the activity gate
pub const METRIC_RMS: &str = "rms";
pub const METRIC_FLUX: &str = "flux";
pub const METRIC_DBSPL: &str = "dbspl";

/// Bounded ring of the most recent chunks
#[derive(Debug, Clone)]
pub struct PreRollRing {
    chunks: VecDeque<Chunk>,
    capacity: usize,
}

impl PreRollRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a chunk, evicting the oldest once full
    pub fn push(&mut self, chunk: Chunk) {
        if self.capacity == 0 {
            return;
        }
        if self.chunks.len() == self.capacity {
            self.chunks.pop_front();
        }
        self.chunks.push_back(chunk);
    }

    /// Copy of the ring contents, oldest first
    pub fn snapshot(&self) -> Vec<Chunk> {
        self.chunks.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    /// Most recently pushed chunk
    pub fn latest(&self) -> Option<&Chunk> {
        self.chunks.back()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Shared mutable bus for one pipeline
#[derive(Debug, Clone)]
pub struct SharedContext {
    // Per-cycle state
    pub current_label: String,
    pub current_confidence: f64,
    pub metrics: HashMap<String, f64>,
    pub actions_to_take: BTreeSet<ActionTag>,

    // Flags
    pub is_recording: bool,
    pub is_night_time: bool,
    pub privacy_mode_active: bool,

    // Cross-cycle buffers
    pub pre_roll: PreRollRing,
    pub recording_buffer: Vec<Chunk>,
}

impl SharedContext {
    /// Create a context whose pre-roll ring holds `pre_roll_chunks` chunks
    pub fn new(pre_roll_chunks: usize) -> Self {
        let mut metrics = HashMap::new();
        metrics.insert(METRIC_RMS.to_string(), 0.0);
        metrics.insert(METRIC_FLUX.to_string(), 0.0);
        metrics.insert(METRIC_DBSPL.to_string(), 0.0);

        Self {
            current_label: SILENCE_LABEL.to_string(),
            current_confidence: 0.0,
            metrics,
            actions_to_take: BTreeSet::new(),
            is_recording: false,
            is_night_time: false,
            privacy_mode_active: false,
            pre_roll: PreRollRing::new(pre_roll_chunks),
            recording_buffer: Vec::new(),
        }
    }

    pub fn metric(&self, key: &str) -> f64 {
        self.metrics.get(key).copied().unwrap_or(0.0)
    }

    pub fn set_metric(&mut self, key: &str, value: f64) {
        self.metrics.insert(key.to_string(), value);
    }

    /// Whether any action that starts or sustains a recording is queued
    pub fn has_start_action(&self) -> bool {
        self.actions_to_take.iter().any(|a| a.starts_recording())
    }

    pub fn is_silence(&self) -> bool {
        self.current_label == SILENCE_LABEL
    }
}
