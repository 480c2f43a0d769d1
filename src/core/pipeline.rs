//! The per-chunk pipeline loop.
//!
//! Each chunk flows through the same stages in order, on one dedicated OS
//! thread that owns the [`SharedContext`]:
//!
//! 1. push into the pre-roll ring
//! 2. activity gate + classifier ([`FeatureStage`])
//! 3. policy evaluation ([`PolicyEngine`])
//! 4. action dispatch (alerts, metadata logging)
//! 5. recorder state machine ([`Recorder`])
//!
//! Time comes from the stream position rather than the wall clock, so file
//! replay faster than real time still sees correct cooldowns and durations.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Timelike};

use super::gate::{FeatureStage, GateDecision};
use super::recorder::{Recorder, RecorderStep};
use super::shutdown::Shutdown;
use crate::capture::AudioSource;
use crate::domain::{ActionTag, Chunk, SharedContext, METRIC_DBSPL, METRIC_FLUX, METRIC_RMS};
use crate::policy::{PolicyEngine, PolicyOutcome};
use crate::services::alerts::{alert_text, AlertSender};

// ============================================================================
// Stream clock
// ============================================================================

/// Time of one cycle: monotonic for durations, local wall time for the hour
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub at: Instant,
    pub wall: DateTime<Local>,
}

/// Derives time from the number of samples consumed
#[derive(Debug, Clone)]
pub struct StreamClock {
    origin: Instant,
    wall_origin: DateTime<Local>,
    sample_rate: u32,
    samples: u64,
}

impl StreamClock {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_origin(sample_rate, Instant::now(), Local::now())
    }

    pub fn with_origin(sample_rate: u32, origin: Instant, wall_origin: DateTime<Local>) -> Self {
        Self {
            origin,
            wall_origin,
            sample_rate: sample_rate.max(1),
            samples: 0,
        }
    }

    /// Stream time elapsed so far
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.samples as f64 / self.sample_rate as f64)
    }

    /// Consume `samples` and return the time at the end of them
    pub fn advance(&mut self, samples: usize) -> Tick {
        self.samples += samples as u64;
        let elapsed = self.elapsed();
        let wall_offset = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        Tick {
            at: self.origin + elapsed,
            wall: self.wall_origin + wall_offset,
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Everything that happened to one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub gate: GateDecision,
    pub policy: PolicyOutcome,
    pub recorder: RecorderStep,
}

/// Totals for a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub chunks: u64,
    pub classified: u64,
    pub recordings_started: u64,
    pub recordings_stopped: u64,
}

impl PipelineStats {
    fn record(&mut self, report: &CycleReport) {
        self.chunks += 1;
        if matches!(report.gate, GateDecision::Classified { .. }) {
            self.classified += 1;
        }
        match report.recorder {
            RecorderStep::Started { .. } => self.recordings_started += 1,
            RecorderStep::Stopped { .. } => self.recordings_stopped += 1,
            _ => {}
        }
    }
}

pub struct Pipeline {
    ctx: SharedContext,
    gate: FeatureStage,
    policy: PolicyEngine,
    recorder: Recorder,
    alerts: Option<AlertSender>,
    clock: StreamClock,
}

impl Pipeline {
    pub fn new(
        ctx: SharedContext,
        gate: FeatureStage,
        policy: PolicyEngine,
        recorder: Recorder,
        clock: StreamClock,
    ) -> Self {
        Self {
            ctx,
            gate,
            policy,
            recorder,
            alerts: None,
            clock,
        }
    }

    pub fn with_alerts(mut self, alerts: AlertSender) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn context(&self) -> &SharedContext {
        &self.ctx
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Run one chunk through every stage
    pub fn process_chunk(&mut self, samples: Vec<f32>) -> CycleReport {
        let tick = self.clock.advance(samples.len());
        let chunk: Chunk = Arc::from(samples);

        self.ctx.pre_roll.push(Arc::clone(&chunk));

        let gate = self.gate.process(&chunk, &mut self.ctx);
        let policy = self.policy.evaluate(&mut self.ctx, tick.at, tick.wall.hour());
        self.dispatch(&policy);
        let recorder = self.recorder.step(&chunk, &mut self.ctx, tick.at, tick.wall);

        CycleReport {
            gate,
            policy,
            recorder,
        }
    }

    /// Side-effect actions; recording actions are handled by the recorder
    fn dispatch(&self, outcome: &PolicyOutcome) {
        for action in &self.ctx.actions_to_take {
            match action {
                ActionTag::AlertNotify => {
                    let Some(alerts) = &self.alerts else {
                        continue;
                    };
                    let text = alert_text(
                        &outcome.fired.join(", "),
                        &self.ctx.current_label,
                        self.ctx.current_confidence,
                        self.ctx.metric(METRIC_DBSPL),
                    );
                    alerts.send(text);
                }
                ActionTag::LogMetadata => {
                    tracing::info!(
                        label = %self.ctx.current_label,
                        confidence = self.ctx.current_confidence,
                        rms = self.ctx.metric(METRIC_RMS),
                        flux = self.ctx.metric(METRIC_FLUX),
                        dbspl = self.ctx.metric(METRIC_DBSPL),
                        "Event metadata"
                    );
                }
                ActionTag::CloudUpload | ActionTag::RecordEvidence => {}
            }
        }
    }

    /// Pull chunks until the source ends or shutdown is requested
    pub fn run(&mut self, source: &mut dyn AudioSource, shutdown: &Shutdown) -> Result<PipelineStats> {
        let mut stats = PipelineStats::default();

        while !shutdown.is_triggered() {
            let Some(samples) = source.next_chunk().context("Audio source failed")? else {
                tracing::info!("Audio source exhausted");
                break;
            };
            if samples.is_empty() {
                continue;
            }

            let report = self.process_chunk(samples);
            stats.record(&report);
        }

        if let RecorderStep::Stopped { .. } = self.recorder.finish(&mut self.ctx) {
            stats.recordings_stopped += 1;
        }

        tracing::info!(
            "Pipeline finished: {} chunks, {} classified, {} recordings",
            stats.chunks,
            stats.classified,
            stats.recordings_stopped
        );
        Ok(stats)
    }

    /// Run on a dedicated thread named `pipeline`
    pub fn spawn(
        mut self,
        mut source: Box<dyn AudioSource>,
        shutdown: Shutdown,
    ) -> Result<JoinHandle<Result<PipelineStats>>> {
        std::thread::Builder::new()
            .name("pipeline".to_string())
            .spawn(move || self.run(source.as_mut(), &shutdown))
            .context("Failed to spawn pipeline thread")
    }
}
