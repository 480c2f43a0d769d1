//! `run`: wire the pipeline and the background workers together.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::adapters::{HttpObjectStore, Notifier, ObjectStore, TelegramClient, TelegramConfig};
use crate::audio::{AudioProcessor, CalibrationConstants, CalibrationProfile, GainCalibrator};
use crate::capture::WavFileSource;
use crate::classifier::{ClassMap, HttpClassifier};
use crate::config::Settings;
use crate::core::pipeline::{Pipeline, StreamClock};
use crate::core::shutdown::{self, Shutdown};
use crate::core::telemetry::{self, Telemetry};
use crate::core::{FeatureStage, Recorder};
use crate::domain::SharedContext;
use crate::policy::{PolicyEngine, PolicyReloader, PrivacySwitch, RuleSet};
use crate::services::{alerts, health, system};
use crate::uploader::{metrics_log, UploaderService};

const ALERT_QUEUE_CAPACITY: usize = 32;

/// Start every worker, run the pipeline until the input ends or Ctrl-C,
/// then shut down and drain.
pub async fn run(mut settings: Settings, input: Option<PathBuf>, realtime: bool) -> Result<()> {
    settings.apply_credentials();

    let input = input
        .or_else(|| settings.audio.input_path.as_deref().map(|p| settings.resolve(p)))
        .context("No audio input: pass --input or set audio.input_path")?;

    let output_dir = settings.output_dir();
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    // Fatal startup checks first, before any worker is running
    let class_map_path = settings.resolve(&settings.feature_extractor.class_map_path);
    let class_map = ClassMap::load(&class_map_path)
        .with_context(|| format!("Failed to load class map {}", class_map_path.display()))?;

    let (constants, calibrator) = load_calibration(&settings)?;

    let classifier = HttpClassifier::connect(
        &settings.feature_extractor.classifier_endpoint,
        settings.feature_extractor.target_sample_rate,
        settings.feature_extractor.model_input_size,
        settings.classifier_timeout(),
    )
    .await
    .context("Classifier is not available")?;

    let policy_path = settings.policy_file();
    let rules = if policy_path.exists() {
        RuleSet::load(&policy_path)?
    } else {
        tracing::warn!("Policy file {} not found, starting with no rules", policy_path.display());
        RuleSet::empty()
    };

    let source = WavFileSource::open(
        &input,
        settings.audio.sample_rate,
        settings.audio.chunk_size,
        realtime,
    )?;

    if let Some(addr) = &settings.telemetry.prometheus_listen {
        let addr: SocketAddr = addr.parse().context("Invalid telemetry.prometheus_listen")?;
        telemetry::install_prometheus(addr)?;
    }

    let (trigger, shutdown) = shutdown::channel();
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    // Policy reload and privacy flag
    let privacy = PrivacySwitch::new(settings.policy.privacy_mode);
    let flag = settings.policy.privacy_flag_file.as_deref().map(|p| settings.resolve(p));
    let (reloader, rules_rx) = PolicyReloader::new(
        &policy_path,
        rules,
        Duration::from_secs(settings.policy.reload_seconds.max(1)),
        privacy.clone(),
        flag,
    );
    workers.push(tokio::spawn(reloader.run(shutdown.clone())));

    // Remote backends
    let store = build_store(&settings)?;
    let notifier = build_notifier(&settings, &shutdown);

    // Uploader
    let (events_tx, events_rx) = mpsc::channel(settings.recorder.handoff_capacity);
    let (metrics_tx, metrics_rx) = metrics_log::channel(settings.recorder.metrics_capacity);
    let uploader_settings = settings.uploader_settings();
    let csv = uploader_settings.metrics_csv();
    let uploader = UploaderService::new(uploader_settings, store, notifier.clone())
        .spawn(events_rx, metrics_rx, shutdown.clone());

    // Host health
    let stats = system::SystemStats::default();
    let attached = settings.uploader.attached_disk_path.as_deref().map(|p| settings.resolve(p));
    let sampler = system::SystemSampler::new(output_dir.clone(), attached);
    workers.push(tokio::spawn(system::run_sampler(
        sampler,
        stats.clone(),
        Duration::from_secs(settings.services.system_sample_seconds.max(1)),
        shutdown.clone(),
    )));
    workers.push(tokio::spawn(system::run_heartbeat_rows(
        csv,
        stats.clone(),
        Duration::from_secs(settings.services.system_heartbeat_seconds.max(1)),
        shutdown.clone(),
    )));

    let ping_url = settings
        .services
        .hc_ping_url
        .clone()
        .filter(|_| settings.services.internet_enabled);
    let monitor = health::HealthMonitor::new(health::status_led(settings.services.gpio_heartbeat_pin), ping_url);
    workers.push(tokio::spawn(monitor.run(
        Duration::from_secs(settings.services.heartbeat_interval_seconds.max(1)),
        shutdown.clone(),
    )));

    // Alerts and telemetry
    let (alert_tx, alert_rx) = alerts::channel(ALERT_QUEUE_CAPACITY);
    workers.push(tokio::spawn(alerts::run_alert_worker(notifier, alert_rx, shutdown.clone())));

    let telemetry = Arc::new(Telemetry::new());
    workers.push(tokio::spawn(telemetry::run_syncer(
        Arc::clone(&telemetry),
        Duration::from_secs(settings.telemetry.reset_interval_seconds.max(1)),
        shutdown.clone(),
    )));

    // Pipeline
    let gate = FeatureStage::new(
        settings.gate_config(),
        constants,
        Box::new(classifier),
        class_map,
        Arc::clone(&telemetry),
    );
    let engine = PolicyEngine::new(
        rules_rx,
        settings.daypart(),
        settings.alert_cooldown(),
        privacy,
    );
    let recorder = Recorder::new(settings.recorder_config(), calibrator, events_tx)
        .with_metrics_log(metrics_tx, stats)
        .with_telemetry(telemetry);
    let pipeline = Pipeline::new(
        SharedContext::new(settings.audio.pre_roll_chunks),
        gate,
        engine,
        recorder,
        StreamClock::new(settings.audio.sample_rate),
    )
    .with_alerts(alert_tx);

    tracing::info!(input = %input.display(), "Acoustic monitor running");
    let handle = pipeline.spawn(Box::new(source), shutdown.clone())?;
    let mut pipeline_done = tokio::task::spawn_blocking(move || handle.join());

    let joined = tokio::select! {
        joined = &mut pipeline_done => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            trigger.trigger();
            pipeline_done.await
        }
    };
    match joined {
        Ok(Ok(Ok(stats))) => tracing::info!("Pipeline processed {} chunks", stats.chunks),
        Ok(Ok(Err(e))) => tracing::error!("Pipeline failed: {:#}", e),
        Ok(Err(_)) => tracing::error!("Pipeline thread panicked"),
        Err(e) => tracing::error!("Failed to join pipeline: {}", e),
    }

    // Events still queued now are saved offline by the stream worker
    trigger.trigger();
    uploader.join().await;
    for worker in workers {
        let _ = worker.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn load_calibration(
    settings: &Settings,
) -> Result<(Option<CalibrationConstants>, Option<Box<dyn AudioProcessor>>)> {
    let Some(file) = &settings.audio.calibration_file else {
        tracing::info!("No calibration file, running uncalibrated");
        return Ok((None, None));
    };

    let path = settings.resolve(file);
    let profile = CalibrationProfile::load(&path)
        .with_context(|| format!("Failed to load calibration {}", path.display()))?;
    let constants = profile.constants();

    tracing::info!(
        "Calibration loaded: sensitivity {:.2} dBFS @ {:.0} dB SPL",
        constants.sensitivity_dbfs,
        constants.reference_dbspl
    );

    let calibrator: Box<dyn AudioProcessor> = Box::new(GainCalibrator::from_profile(&profile));
    Ok((Some(constants), Some(calibrator)))
}

fn build_store(settings: &Settings) -> Result<Option<Arc<dyn ObjectStore>>> {
    if !settings.uploads_online() {
        tracing::info!("Cloud upload offline, evidence will be kept locally");
        return Ok(None);
    }

    let cloud = &settings.services.cloud;
    let Some(endpoint) = &cloud.endpoint else {
        return Ok(None);
    };
    let store = HttpObjectStore::new(
        endpoint,
        &cloud.bucket,
        cloud.access_key.clone(),
        cloud.secret_key.clone(),
    )?;
    Ok(Some(Arc::new(store)))
}

fn build_notifier(settings: &Settings, shutdown: &Shutdown) -> Option<Arc<dyn Notifier>> {
    if !settings.notifications_online() {
        return None;
    }

    let services = &settings.services;
    let (Some(bot_token), Some(chat_id)) = (&services.telegram_bot_token, &services.telegram_chat_id) else {
        return None;
    };

    let client = TelegramClient::from_config(TelegramConfig {
        bot_token: bot_token.clone(),
        chat_id: chat_id.clone(),
        retry_attempts: services.retry_attempts,
        retry_delay_seconds: services.retry_delay_seconds,
    })
    .with_shutdown(shutdown.clone());

    Some(Arc::new(client))
}
