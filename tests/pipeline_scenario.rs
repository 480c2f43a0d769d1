//! End-to-end pipeline tests
//!
//! Drives the full gate -> policy -> recorder chain with in-memory audio
//! and a scripted classifier.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, TimeZone};
use tokio::sync::{mpsc, watch};

use acoustic_monitor::capture::MemorySource;
use acoustic_monitor::classifier::{ClassMap, Classifier, ClassifierError};
use acoustic_monitor::core::shutdown;
use acoustic_monitor::core::telemetry::Telemetry;
use acoustic_monitor::core::{
    FeatureStage, GateConfig, Pipeline, Recorder, RecorderConfig, StreamClock,
};
use acoustic_monitor::domain::{EventObject, SharedContext};
use acoustic_monitor::policy::{DayPart, PolicyEngine, PrivacySwitch, RuleSet};

const RATE: u32 = 16_000;
const CHUNK: usize = 16_000;

struct ScriptedClassifier {
    scores: Vec<f32>,
    calls: Arc<AtomicUsize>,
}

impl Classifier for ScriptedClassifier {
    fn classify(&mut self, frame: &[f32]) -> Result<Vec<f32>, ClassifierError> {
        assert_eq!(frame.len(), CHUNK);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scores.clone())
    }
}

/// Answers once, then stalls for `stall` and fails on every later frame
struct StallingClassifier {
    stall: Duration,
    calls: usize,
}

impl Classifier for StallingClassifier {
    fn classify(&mut self, _frame: &[f32]) -> Result<Vec<f32>, ClassifierError> {
        self.calls += 1;
        if self.calls == 1 {
            return Ok(vec![0.05, 0.9]);
        }
        std::thread::sleep(self.stall);
        Err(ClassifierError::Inference(format!("no answer within {:?}", self.stall)))
    }
}

const BARK_POLICY: &str = r#"
policies:
  - name: bark-evidence
    condition: 'label == "Bark" and confidence > 0.5'
    actions: [record_evidence]
    cooldown_seconds: 60
"#;

fn build(
    policy_yaml: &str,
    pre_roll: usize,
    privacy: bool,
) -> (Pipeline, mpsc::Receiver<EventObject>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let classifier = ScriptedClassifier {
        scores: vec![0.05, 0.9],
        calls: Arc::clone(&calls),
    };
    let (pipeline, events) = build_with(policy_yaml, pre_roll, privacy, Box::new(classifier));
    (pipeline, events, calls)
}

fn build_with(
    policy_yaml: &str,
    pre_roll: usize,
    privacy: bool,
    classifier: Box<dyn Classifier>,
) -> (Pipeline, mpsc::Receiver<EventObject>) {
    let gate = FeatureStage::new(
        GateConfig {
            rms_threshold: 0.01,
            flux_threshold: 1.0e9,
            dbspl_threshold: 40.0,
            input_rate: RATE,
            target_rate: RATE,
            frame_len: CHUNK,
            logging_confidence_threshold: 0.5,
        },
        None,
        classifier,
        ClassMap::new(vec!["Speech".to_string(), "Bark".to_string()]),
        Arc::new(Telemetry::new()),
    );

    let rules = RuleSet::from_yaml(policy_yaml).unwrap();
    let (_tx, rx) = watch::channel(Arc::new(rules));
    let engine = PolicyEngine::new(
        rx,
        DayPart::default(),
        Duration::from_secs(60),
        PrivacySwitch::new(privacy),
    );

    let (events_tx, events_rx) = mpsc::channel(4);
    let recorder = Recorder::new(
        RecorderConfig {
            sample_rate: RATE,
            max_duration: Duration::from_secs(60),
            post_roll: Duration::from_secs(10),
            save_calibrated: false,
        },
        None,
        events_tx,
    );

    let noon = Local.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
    let pipeline = Pipeline::new(
        SharedContext::new(pre_roll),
        gate,
        engine,
        recorder,
        StreamClock::with_origin(RATE, Instant::now(), noon),
    );

    (pipeline, events_rx)
}

fn scenario_chunks(silent_before: usize, barks: usize, silent_after: usize) -> Vec<Vec<f32>> {
    let mut chunks = Vec::new();
    chunks.extend((0..silent_before).map(|_| vec![0.0; CHUNK]));
    chunks.extend((0..barks).map(|_| vec![0.5; CHUNK]));
    chunks.extend((0..silent_after).map(|_| vec![0.0; CHUNK]));
    chunks
}

#[test]
fn test_silence_then_bark_produces_one_event() {
    let (mut pipeline, mut events, calls) = build(BARK_POLICY, 5, false);
    let mut source = MemorySource::new(RATE, scenario_chunks(20, 5, 12));
    let (_trigger, shutdown) = shutdown::channel();

    let stats = pipeline.run(&mut source, &shutdown).unwrap();

    assert_eq!(stats.chunks, 37);
    assert_eq!(stats.recordings_started, 1);
    assert_eq!(stats.recordings_stopped, 1);

    // Silent chunks never reach the classifier
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    let event = events.try_recv().expect("one event");
    assert_eq!(event.metadata.label, "Bark");
    assert!((event.metadata.confidence - 0.9).abs() < 1e-6);
    assert!(!event.metadata.calibrated);
    assert_eq!(event.sample_rate, RATE);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_event_starts_with_pre_roll() {
    let (mut pipeline, mut events, _) = build(BARK_POLICY, 5, false);
    let mut source = MemorySource::new(RATE, scenario_chunks(20, 5, 12));
    let (_trigger, shutdown) = shutdown::channel();

    pipeline.run(&mut source, &shutdown).unwrap();
    let event = events.try_recv().unwrap();

    // Ring of 5 at the first bark: 4 silent chunks then the bark itself
    let leading = &event.audio_samples[..5 * CHUNK];
    assert!(leading[..4 * CHUNK].iter().all(|s| *s == 0.0));
    assert!(leading[4 * CHUNK..].iter().all(|s| *s == 0.5));

    // Started at the first bark, fade from the second, stopped 10s later
    let seconds = event.duration_seconds;
    assert!((14.0..=16.0).contains(&seconds), "duration {}", seconds);
}

#[test]
fn test_privacy_mode_blocks_recording() {
    let (mut pipeline, mut events, calls) = build(BARK_POLICY, 5, true);
    let mut source = MemorySource::new(RATE, scenario_chunks(2, 5, 12));
    let (_trigger, shutdown) = shutdown::channel();

    let stats = pipeline.run(&mut source, &shutdown).unwrap();

    assert_eq!(stats.recordings_started, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert!(events.try_recv().is_err());
    assert!(pipeline.context().privacy_mode_active);
}

#[test]
fn test_recording_open_at_end_of_input_is_flushed() {
    let (mut pipeline, mut events, _) = build(BARK_POLICY, 2, false);
    let mut source = MemorySource::new(RATE, scenario_chunks(1, 3, 1));
    let (_trigger, shutdown) = shutdown::channel();

    let stats = pipeline.run(&mut source, &shutdown).unwrap();

    assert_eq!(stats.recordings_stopped, 1);
    assert!(!pipeline.is_recording());
    let event = events.try_recv().unwrap();
    assert_eq!(event.metadata.label, "Bark");
}

#[test]
fn test_shutdown_stops_before_reading() {
    let (mut pipeline, _events, calls) = build(BARK_POLICY, 2, false);
    let mut source = MemorySource::new(RATE, scenario_chunks(0, 5, 0));
    let (trigger, shutdown) = shutdown::channel();
    trigger.trigger();

    let stats = pipeline.run(&mut source, &shutdown).unwrap();

    assert_eq!(stats.chunks, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_stalled_classifier_does_not_hold_up_shutdown() {
    let classifier = StallingClassifier {
        stall: Duration::from_millis(100),
        calls: 0,
    };
    let (pipeline, mut events) = build_with(BARK_POLICY, 2, false, Box::new(classifier));
    let source = MemorySource::new(RATE, scenario_chunks(0, 200, 0));
    let (trigger, shutdown) = shutdown::channel();

    let handle = pipeline.spawn(Box::new(source), shutdown).unwrap();
    std::thread::sleep(Duration::from_millis(350));

    let triggered = Instant::now();
    trigger.trigger();
    let stats = handle.join().unwrap().unwrap();

    // At most one stalled call is still in flight when the trigger lands
    assert!(triggered.elapsed() < Duration::from_secs(1), "took {:?}", triggered.elapsed());
    assert!(stats.chunks < 200);
    assert_eq!(stats.classified, 1);
    assert_eq!(stats.recordings_started, 1);
    assert_eq!(stats.recordings_stopped, 1);

    // Failed inferences kept the last good label
    let event = events.try_recv().unwrap();
    assert_eq!(event.metadata.label, "Bark");
}
