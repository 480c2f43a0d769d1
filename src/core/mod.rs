//! Core runtime.
//!
//! This module contains:
//! - Shutdown: cooperative stop signal for every worker
//! - Telemetry: max-hold peaks exported as gauges
//! - Gate: activity gate and classifier stage
//! - Recorder: evidence recording state machine
//! - Pipeline: the per-chunk loop tying the stages together

pub mod gate;
pub mod pipeline;
pub mod recorder;
pub mod shutdown;
pub mod telemetry;

// Re-export commonly used types
pub use gate::{FeatureStage, GateConfig, GateDecision};
pub use pipeline::{CycleReport, Pipeline, PipelineStats, StreamClock, Tick};
pub use recorder::{Recorder, RecorderConfig, RecorderStep, StopReason};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use telemetry::Telemetry;
