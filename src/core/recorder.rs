//! Evidence recorder state machine.
//!
//! Idle until a policy queues a recording action, then captures the pre-roll
//! plus every following chunk. Recording ends at the maximum duration or once
//! no start action has been seen for the post-roll period. The finished clip
//! is handed to the uploader as an [`EventObject`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::AudioProcessor;
use crate::core::telemetry::Telemetry;
use crate::domain::{
    Chunk, EventMetadata, EventObject, MetricsRow, SharedContext, METRIC_DBSPL, METRIC_FLUX,
    METRIC_RMS, UNKNOWN_LABEL,
};
use crate::services::system::SystemStats;
use crate::uploader::metrics_log::MetricsLogSender;

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub sample_rate: u32,
    pub max_duration: Duration,
    pub post_roll: Duration,
    /// Pass saved audio through the calibrator when one is available
    pub save_calibrated: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            max_duration: Duration::from_secs(60),
            post_roll: Duration::from_secs(10),
            save_calibrated: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxDuration,
    PostRoll,
    /// The source ended or shutdown was requested mid-recording
    EndOfStream,
}

/// What the recorder did with one chunk
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderStep {
    Idle,
    Started { id: Uuid },
    Recording,
    Stopped {
        id: Uuid,
        reason: StopReason,
        /// False when the handoff queue rejected the event
        enqueued: bool,
    },
}

#[derive(Debug)]
struct Session {
    id: Uuid,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    fade_started: Option<Instant>,
    best_label: Option<(String, f64)>,
    peak_dbspl: f64,
}

pub struct Recorder {
    config: RecorderConfig,
    calibrator: Option<Box<dyn AudioProcessor>>,
    handoff: mpsc::Sender<EventObject>,
    metrics_log: Option<MetricsLogSender>,
    system: SystemStats,
    telemetry: Option<Arc<Telemetry>>,
    session: Option<Session>,
}

impl Recorder {
    pub fn new(
        config: RecorderConfig,
        calibrator: Option<Box<dyn AudioProcessor>>,
        handoff: mpsc::Sender<EventObject>,
    ) -> Self {
        Self {
            config,
            calibrator,
            handoff,
            metrics_log: None,
            system: SystemStats::default(),
            telemetry: None,
            session: None,
        }
    }

    pub fn with_metrics_log(mut self, sender: MetricsLogSender, system: SystemStats) -> Self {
        self.metrics_log = Some(sender);
        self.system = system;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    fn calibrating(&self) -> bool {
        self.config.save_calibrated && self.calibrator.is_some()
    }

    fn prepare(&self, chunk: &Chunk) -> Chunk {
        match &self.calibrator {
            Some(cal) if self.config.save_calibrated => Arc::from(cal.process(chunk)),
            _ => Arc::clone(chunk),
        }
    }

    /// Advance the state machine by one chunk.
    ///
    /// `chunk` is expected to be the newest entry of the context's pre-roll.
    pub fn step(
        &mut self,
        chunk: &Chunk,
        ctx: &mut SharedContext,
        now: Instant,
        wall: DateTime<Local>,
    ) -> RecorderStep {
        let start_requested = ctx.has_start_action();

        if self.session.is_none() {
            if !start_requested {
                return RecorderStep::Idle;
            }
            let id = self.start(chunk, ctx, now, wall);
            self.observe(ctx, wall);
            return RecorderStep::Started { id };
        }

        let prepared = self.prepare(chunk);
        ctx.recording_buffer.push(prepared);
        self.observe(ctx, wall);

        let Some(session) = self.session.as_mut() else {
            return RecorderStep::Idle;
        };

        if start_requested {
            session.fade_started = None;
        } else if session.fade_started.is_none() {
            session.fade_started = Some(now);
        }

        let elapsed = now.saturating_duration_since(session.started_at);
        let reason = if elapsed >= self.config.max_duration {
            Some(StopReason::MaxDuration)
        } else if session
            .fade_started
            .is_some_and(|fade| now.saturating_duration_since(fade) >= self.config.post_roll)
        {
            Some(StopReason::PostRoll)
        } else {
            None
        };

        match reason {
            Some(reason) => self.stop(ctx, reason),
            None => RecorderStep::Recording,
        }
    }

    /// Close an open session so its audio is not lost
    pub fn finish(&mut self, ctx: &mut SharedContext) -> RecorderStep {
        if self.session.is_none() {
            return RecorderStep::Idle;
        }
        self.stop(ctx, StopReason::EndOfStream)
    }

    fn start(
        &mut self,
        chunk: &Chunk,
        ctx: &mut SharedContext,
        now: Instant,
        wall: DateTime<Local>,
    ) -> Uuid {
        let id = Uuid::new_v4();

        ctx.recording_buffer = if self.calibrating() {
            ctx.pre_roll.iter().map(|c| self.prepare(c)).collect()
        } else {
            ctx.pre_roll.snapshot()
        };

        // A zero-length ring holds nothing, not even the triggering chunk
        let in_ring = ctx.pre_roll.latest().is_some_and(|last| Arc::ptr_eq(last, chunk));
        if !in_ring {
            let prepared = self.prepare(chunk);
            ctx.recording_buffer.push(prepared);
        }
        ctx.is_recording = true;

        tracing::info!(
            %id,
            label = %ctx.current_label,
            pre_roll = ctx.recording_buffer.len(),
            "Recording started"
        );

        self.session = Some(Session {
            id,
            started_at: now,
            started_wall: wall.with_timezone(&Utc),
            fade_started: None,
            best_label: None,
            peak_dbspl: 0.0,
        });
        id
    }

    /// Fold this cycle's label and levels into the session and log a metrics row
    fn observe(&mut self, ctx: &SharedContext, wall: DateTime<Local>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if !ctx.is_silence() {
            let better = session
                .best_label
                .as_ref()
                .map_or(true, |(_, conf)| ctx.current_confidence > *conf);
            if better {
                session.best_label = Some((ctx.current_label.clone(), ctx.current_confidence));
            }
        }
        session.peak_dbspl = session.peak_dbspl.max(ctx.metric(METRIC_DBSPL));

        if let Some(log) = &self.metrics_log {
            log.send(MetricsRow {
                id: session.id.to_string(),
                timestamp: wall,
                label: ctx.current_label.clone(),
                confidence: ctx.current_confidence,
                rms: ctx.metric(METRIC_RMS),
                dbspl: ctx.metric(METRIC_DBSPL),
                flux: ctx.metric(METRIC_FLUX),
                system: self.system.snapshot(),
            });
        }
    }

    fn stop(&mut self, ctx: &mut SharedContext, reason: StopReason) -> RecorderStep {
        let calibrated = self.calibrating();

        let Some(session) = self.session.take() else {
            return RecorderStep::Idle;
        };

        let chunks = std::mem::take(&mut ctx.recording_buffer);
        ctx.is_recording = false;

        let audio_samples: Vec<f32> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        let duration_seconds = audio_samples.len() as f64 / self.config.sample_rate as f64;

        let (label, confidence) = session
            .best_label
            .unwrap_or_else(|| (UNKNOWN_LABEL.to_string(), 0.0));

        let event = EventObject {
            id: session.id,
            timestamp: session.started_wall,
            duration_seconds,
            sample_rate: self.config.sample_rate,
            audio_samples,
            metadata: EventMetadata {
                label: label.clone(),
                confidence,
                calibrated,
                peak_dbspl: (calibrated && session.peak_dbspl > 0.0).then_some(session.peak_dbspl),
            },
        };

        tracing::info!(
            id = %session.id,
            label = %label,
            "Recording stopped ({:?}, {:.1}s)",
            reason,
            duration_seconds
        );

        if let Some(telemetry) = &self.telemetry {
            telemetry.record_event(&label);
        }

        let enqueued = match self.handoff.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::error!(id = %event.id, "Upload queue full, event lost");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::error!(id = %event.id, "Upload queue closed, event lost");
                false
            }
        };

        RecorderStep::Stopped {
            id: session.id,
            reason,
            enqueued,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ActionTag;

    fn chunk(v: f32) -> Chunk {
        Arc::from(vec![v; 10])
    }

    fn feed(
        rec: &mut Recorder,
        ctx: &mut SharedContext,
        value: f32,
        record: bool,
        at: Instant,
    ) -> RecorderStep {
        let c = chunk(value);
        ctx.pre_roll.push(c.clone());
        ctx.actions_to_take.clear();
        if record {
            ctx.actions_to_take.insert(ActionTag::RecordEvidence);
            ctx.current_label = "Bark".to_string();
            ctx.current_confidence = 0.8;
        }
        rec.step(&c, ctx, at, Local::now())
    }

    fn config() -> RecorderConfig {
        RecorderConfig {
            sample_rate: 10,
            max_duration: Duration::from_secs(60),
            post_roll: Duration::from_secs(3),
            save_calibrated: false,
        }
    }

    #[test]
    fn test_idle_without_start_action() {
        let (tx, _rx) = mpsc::channel(4);
        let mut rec = Recorder::new(config(), None, tx);
        let mut ctx = SharedContext::new(3);
        assert_eq!(feed(&mut rec, &mut ctx, 0.1, false, Instant::now()), RecorderStep::Idle);
        assert!(!ctx.is_recording);
    }

    #[test]
    fn test_pre_roll_is_prefix_and_trigger_not_duplicated() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut rec = Recorder::new(config(), None, tx);
        let mut ctx = SharedContext::new(3);
        let t0 = Instant::now();

        feed(&mut rec, &mut ctx, 1.0, false, t0);
        feed(&mut rec, &mut ctx, 2.0, false, t0 + Duration::from_secs(1));
        assert!(matches!(
            feed(&mut rec, &mut ctx, 3.0, true, t0 + Duration::from_secs(2)),
            RecorderStep::Started { .. }
        ));
        assert_eq!(ctx.recording_buffer.len(), 3);

        let mut step = RecorderStep::Recording;
        for i in 3..10 {
            step = feed(&mut rec, &mut ctx, i as f32 + 1.0, false, t0 + Duration::from_secs(i));
            if matches!(step, RecorderStep::Stopped { .. }) {
                break;
            }
        }
        assert!(matches!(step, RecorderStep::Stopped { reason: StopReason::PostRoll, enqueued: true, .. }));

        let event = rx.try_recv().unwrap();
        let firsts: Vec<f32> = event.audio_samples.chunks(10).map(|c| c[0]).collect();
        // Fade starts at t=3 and ends at t=6
        assert_eq!(firsts, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(event.metadata.label, "Bark");
        assert_eq!(event.duration_seconds, 7.0);
        assert!(ctx.recording_buffer.is_empty());
        assert!(!ctx.is_recording);
    }

    #[test]
    fn test_queue_full_drops_event_and_resets() {
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(EventObject {
            id: Uuid::nil(),
            timestamp: Utc::now(),
            duration_seconds: 0.0,
            sample_rate: 10,
            audio_samples: vec![],
            metadata: EventMetadata {
                label: "x".to_string(),
                confidence: 0.0,
                calibrated: false,
                peak_dbspl: None,
            },
        })
        .unwrap();

        let mut rec = Recorder::new(config(), None, tx);
        let mut ctx = SharedContext::new(2);
        let t0 = Instant::now();
        feed(&mut rec, &mut ctx, 1.0, true, t0);

        let step = feed(&mut rec, &mut ctx, 0.0, false, t0 + Duration::from_secs(61));
        assert!(matches!(
            step,
            RecorderStep::Stopped { reason: StopReason::MaxDuration, enqueued: false, .. }
        ));
        assert!(!rec.is_recording());
    }

    #[test]
    fn test_calibrated_save_transforms_pre_roll() {
        struct Double;
        impl AudioProcessor for Double {
            fn process(&self, samples: &[f32]) -> Vec<f32> {
                samples.iter().map(|s| s * 2.0).collect()
            }
        }

        let (tx, mut rx) = mpsc::channel(4);
        let mut cfg = config();
        cfg.save_calibrated = true;
        cfg.max_duration = Duration::from_secs(1);
        let mut rec = Recorder::new(cfg, Some(Box::new(Double)), tx);
        let mut ctx = SharedContext::new(2);
        let t0 = Instant::now();

        feed(&mut rec, &mut ctx, 0.1, true, t0);
        feed(&mut rec, &mut ctx, 0.2, true, t0 + Duration::from_secs(1));

        let event = rx.try_recv().unwrap();
        assert!(event.metadata.calibrated);
        assert_eq!(event.audio_samples[0], 0.2);
        assert_eq!(event.audio_samples[10], 0.4);
    }
}
