//! acoustic-monitor - Edge acoustic security monitor
//!
//! Listens to a microphone stream (or replayed WAV files), decides which
//! sounds matter, records evidence around them and ships it off-device.
//!
//! # Architecture
//!
//! One pipeline thread runs every audio chunk through the same stages:
//! - activity gate: cheap RMS/flux (and dB SPL) checks before the classifier
//! - policy engine: YAML rules with compiled conditions, cooldowns and privacy mode
//! - recorder: pre-roll, post-roll and max-duration evidence capture
//!
//! Finished recordings cross a bounded queue to tokio workers that upload
//! them, keep them offline when the network is down and retry later.
//!
//! # Modules
//!
//! - `audio`: levels, spectral flux, resampling, calibration, WAV codec
//! - `capture`: audio sources
//! - `classifier`: classifier trait, class map, HTTP sidecar client
//! - `core`: gate, recorder, pipeline loop, shutdown, telemetry
//! - `policy`: rule files, condition language, evaluation, hot reload
//! - `uploader`: stream/retry/batch workers, offline store, disk guard
//! - `services`: host sampling, heartbeat, alerts
//! - `adapters`: object store and Telegram backends
//! - `domain`: shared data structures
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Replay a directory of recordings through the monitor
//! acoustic-monitor run --input ./captures
//!
//! # Check a policy file
//! acoustic-monitor policy check security_policy.yaml
//!
//! # Push offline evidence now
//! acoustic-monitor evidence retry
//! ```

pub mod adapters;
pub mod audio;
pub mod capture;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod policy;
pub mod services;
pub mod uploader;

// Re-export main types at crate root for convenience
pub use config::Settings;
pub use core::{Pipeline, Shutdown};
pub use domain::{ActionTag, EventObject, SharedContext};
pub use policy::{PolicyEngine, RuleSet};

// Telegram integration
pub use adapters::{TelegramClient, TelegramConfig};
