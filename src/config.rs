//! Configuration for the acoustic monitor.
//!
//! Configuration sources (highest priority first):
//! 1. Secrets from environment variables (TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID,
//!    STORAGE_ACCESS_KEY, STORAGE_SECRET_KEY)
//! 2. Config file
//! 3. Defaults
//!
//! Config file discovery:
//! - `--config <path>` if given
//! - ACOUSTIC_MONITOR_CONFIG if set
//! - Searches current directory and parents for .acoustic-monitor/config.yaml
//! - Relative paths in the file resolve against the project root (the parent
//!   of `.acoustic-monitor/`) or the explicit file's directory

pub mod paths;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::gate::GateConfig;
use crate::core::recorder::RecorderConfig;
use crate::policy::DayPart;
use crate::uploader::{RotationPolicy, UploaderSettings};

pub const CONFIG_DIR: &str = ".acoustic-monitor";
pub const CONFIG_FILE: &str = "config.yaml";
pub const CONFIG_ENV: &str = "ACOUSTIC_MONITOR_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Schema
// ============================================================================

/// Complete settings tree (matches the YAML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub audio: AudioConfig,
    pub feature_extractor: FeatureExtractorConfig,
    pub policy: PolicyConfig,
    pub recorder: RecorderSection,
    pub services: ServicesConfig,
    pub uploader: UploaderConfig,
    pub telemetry: TelemetryConfig,

    /// Directory relative paths resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,

    /// File the settings came from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_pre_roll_chunks")]
    pub pre_roll_chunks: usize,
    /// Microphone calibration file; absent means uncalibrated
    #[serde(default)]
    pub calibration_file: Option<String>,
    /// WAV file or directory replayed when `--input` is not given
    #[serde(default)]
    pub input_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureExtractorConfig {
    #[serde(default = "default_class_map_path")]
    pub class_map_path: String,
    #[serde(default = "default_classifier_endpoint")]
    pub classifier_endpoint: String,
    #[serde(default = "default_target_sample_rate")]
    pub target_sample_rate: u32,
    #[serde(default = "default_model_input_size")]
    pub model_input_size: usize,
    #[serde(default = "default_rms_threshold")]
    pub sad_threshold_rms: f64,
    #[serde(default = "default_flux_threshold")]
    pub sad_threshold_flux: f64,
    #[serde(default = "default_dbspl_threshold")]
    pub sad_threshold_dbspl: f64,
    #[serde(default = "default_logging_confidence")]
    pub logging_confidence_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_policy_file")]
    pub file: String,
    #[serde(default = "default_reload_seconds")]
    pub reload_seconds: u64,
    #[serde(default)]
    pub privacy_mode: bool,
    /// Privacy is on while this file exists
    #[serde(default)]
    pub privacy_flag_file: Option<String>,
    #[serde(default = "default_day_start")]
    pub day_start_hour: u32,
    #[serde(default = "default_night_start")]
    pub night_start_hour: u32,
    #[serde(default = "default_alert_cooldown")]
    pub alert_cooldown_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderSection {
    #[serde(default = "default_max_duration")]
    pub max_duration_seconds: f64,
    #[serde(default = "default_post_roll")]
    pub post_roll_seconds: f64,
    #[serde(default = "default_true")]
    pub save_calibrated: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_handoff_capacity")]
    pub handoff_capacity: usize,
    #[serde(default = "default_metrics_capacity")]
    pub metrics_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default, skip_serializing)]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing)]
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_true")]
    pub internet_enabled: bool,
    #[serde(default = "default_true")]
    pub telegram_enabled: bool,
    #[serde(default = "default_true")]
    pub cloud_storage_enabled: bool,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "default_system_heartbeat")]
    pub system_heartbeat_seconds: u64,
    #[serde(default = "default_system_sample")]
    pub system_sample_seconds: u64,
    #[serde(default)]
    pub gpio_heartbeat_pin: Option<u32>,
    #[serde(default)]
    pub hc_ping_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub telegram_bot_token: Option<String>,
    #[serde(default, skip_serializing)]
    pub telegram_chat_id: Option<String>,
    #[serde(default)]
    pub cloud: CloudConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploaderConfig {
    #[serde(default = "default_rotation_size")]
    pub rotation_size_bytes: Option<u64>,
    #[serde(default = "default_rotation_age")]
    pub rotation_age_seconds: Option<u64>,
    #[serde(default = "default_csv_check_interval")]
    pub csv_check_interval_seconds: u64,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_seconds: u64,
    #[serde(default = "default_disk_check_interval")]
    pub disk_check_interval_seconds: u64,
    #[serde(default = "default_disk_threshold")]
    pub disk_threshold_percent: f64,
    /// Extra volume reported as `disk_attached`
    #[serde(default)]
    pub attached_disk_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// e.g. `0.0.0.0:9100`; absent disables the exporter
    #[serde(default)]
    pub prometheus_listen: Option<String>,
    #[serde(default = "default_reset_interval")]
    pub reset_interval_seconds: u64,
}

fn default_sample_rate() -> u32 {
    48_000
}
fn default_chunk_size() -> usize {
    24_000
}
fn default_pre_roll_chunks() -> usize {
    10
}
fn default_class_map_path() -> String {
    "models/yamnet_class_map.csv".to_string()
}
fn default_classifier_endpoint() -> String {
    "http://127.0.0.1:8765".to_string()
}
fn default_target_sample_rate() -> u32 {
    16_000
}
fn default_model_input_size() -> usize {
    15_600
}
fn default_rms_threshold() -> f64 {
    0.005
}
fn default_flux_threshold() -> f64 {
    20.0
}
fn default_dbspl_threshold() -> f64 {
    45.0
}
fn default_logging_confidence() -> f64 {
    0.3
}
fn default_policy_file() -> String {
    "security_policy.yaml".to_string()
}
fn default_reload_seconds() -> u64 {
    5
}
fn default_day_start() -> u32 {
    DayPart::default().day_start
}
fn default_night_start() -> u32 {
    DayPart::default().night_start
}
fn default_alert_cooldown() -> f64 {
    60.0
}
fn default_max_duration() -> f64 {
    60.0
}
fn default_post_roll() -> f64 {
    10.0
}
fn default_true() -> bool {
    true
}
fn default_output_dir() -> String {
    "recordings".to_string()
}
fn default_handoff_capacity() -> usize {
    16
}
fn default_metrics_capacity() -> usize {
    1024
}
fn default_bucket() -> String {
    "acoustic-logs".to_string()
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    5
}
fn default_heartbeat_interval() -> u64 {
    60
}
fn default_system_heartbeat() -> u64 {
    3600
}
fn default_system_sample() -> u64 {
    5
}
fn default_rotation_size() -> Option<u64> {
    Some(1024 * 1024)
}
fn default_rotation_age() -> Option<u64> {
    Some(24 * 3600)
}
fn default_csv_check_interval() -> u64 {
    10
}
fn default_retry_interval() -> u64 {
    60
}
fn default_disk_check_interval() -> u64 {
    300
}
fn default_disk_threshold() -> f64 {
    90.0
}
fn default_reset_interval() -> u64 {
    5
}

// Missing sections fall back to these

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            chunk_size: default_chunk_size(),
            pre_roll_chunks: default_pre_roll_chunks(),
            calibration_file: None,
            input_path: None,
        }
    }
}

impl Default for FeatureExtractorConfig {
    fn default() -> Self {
        Self {
            class_map_path: default_class_map_path(),
            classifier_endpoint: default_classifier_endpoint(),
            target_sample_rate: default_target_sample_rate(),
            model_input_size: default_model_input_size(),
            sad_threshold_rms: default_rms_threshold(),
            sad_threshold_flux: default_flux_threshold(),
            sad_threshold_dbspl: default_dbspl_threshold(),
            logging_confidence_threshold: default_logging_confidence(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            file: default_policy_file(),
            reload_seconds: default_reload_seconds(),
            privacy_mode: false,
            privacy_flag_file: None,
            day_start_hour: default_day_start(),
            night_start_hour: default_night_start(),
            alert_cooldown_seconds: default_alert_cooldown(),
        }
    }
}

impl Default for RecorderSection {
    fn default() -> Self {
        Self {
            max_duration_seconds: default_max_duration(),
            post_roll_seconds: default_post_roll(),
            save_calibrated: true,
            output_dir: default_output_dir(),
            handoff_capacity: default_handoff_capacity(),
            metrics_capacity: default_metrics_capacity(),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            internet_enabled: true,
            telegram_enabled: true,
            cloud_storage_enabled: true,
            retry_attempts: default_retry_attempts(),
            retry_delay_seconds: default_retry_delay(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            system_heartbeat_seconds: default_system_heartbeat(),
            system_sample_seconds: default_system_sample(),
            gpio_heartbeat_pin: None,
            hc_ping_url: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
            cloud: CloudConfig::default(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            bucket: default_bucket(),
            access_key: None,
            secret_key: None,
        }
    }
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            rotation_size_bytes: default_rotation_size(),
            rotation_age_seconds: default_rotation_age(),
            csv_check_interval_seconds: default_csv_check_interval(),
            retry_interval_seconds: default_retry_interval(),
            disk_check_interval_seconds: default_disk_check_interval(),
            disk_threshold_percent: default_disk_threshold(),
            attached_disk_path: None,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            prometheus_listen: None,
            reset_interval_seconds: default_reset_interval(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Find config file by searching `start` and its parents
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Resolve a path that may be relative to `base`
pub fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Settings {
    /// Parse settings from YAML; an empty document yields defaults
    pub fn from_yaml(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load and parse one config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings = Self::from_yaml(&content, path)?;
        settings.source = Some(path.to_path_buf());
        settings.base_dir = base_dir_for(path);
        Ok(settings)
    }

    /// Discover, load, apply env secrets and validate
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env_var(CONFIG_ENV).map(PathBuf::from))
            .or_else(|| find_config_file(&cwd));

        let mut settings = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self {
                base_dir: cwd,
                ..Self::default()
            },
        };

        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Overlay secrets from the environment
    pub fn apply_env(&mut self) {
        let services = &mut self.services;
        if let Some(token) = env_var("TELEGRAM_BOT_TOKEN") {
            services.telegram_bot_token = Some(token);
        }
        if let Some(chat) = env_var("TELEGRAM_CHAT_ID") {
            services.telegram_chat_id = Some(chat);
        }
        if let Some(key) = env_var("STORAGE_ACCESS_KEY") {
            services.cloud.access_key = Some(key);
        }
        if let Some(secret) = env_var("STORAGE_SECRET_KEY") {
            services.cloud.secret_key = Some(secret);
        }
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.audio.sample_rate == 0 || self.feature_extractor.target_sample_rate == 0 {
            return invalid("sample rates must be greater than zero");
        }
        if self.audio.chunk_size == 0 {
            return invalid("audio.chunk_size must be greater than zero");
        }
        if self.feature_extractor.model_input_size == 0 {
            return invalid("feature_extractor.model_input_size must be greater than zero");
        }
        if self.policy.day_start_hour >= 24 || self.policy.night_start_hour >= 24 {
            return invalid("day/night start hours must be in 0..24");
        }
        let spans = [
            ("policy.alert_cooldown_seconds", self.policy.alert_cooldown_seconds),
            ("recorder.max_duration_seconds", self.recorder.max_duration_seconds),
            ("recorder.post_roll_seconds", self.recorder.post_roll_seconds),
        ];
        for (name, value) in spans {
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a finite, non-negative number of seconds, got {}",
                    name, value
                )));
            }
        }
        if self.recorder.max_duration_seconds <= 0.0 {
            return invalid("recorder.max_duration_seconds must be positive");
        }
        let intervals = [
            ("uploader.csv_check_interval_seconds", self.uploader.csv_check_interval_seconds),
            ("uploader.retry_interval_seconds", self.uploader.retry_interval_seconds),
            ("uploader.disk_check_interval_seconds", self.uploader.disk_check_interval_seconds),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
            }
        }
        if self.recorder.handoff_capacity == 0 || self.recorder.metrics_capacity == 0 {
            return invalid("queue capacities must be greater than zero");
        }
        if self.uploader.rotation_size_bytes.is_none() && self.uploader.rotation_age_seconds.is_none() {
            return invalid("at least one of rotation_size_bytes / rotation_age_seconds is required");
        }
        if !(0.0..=100.0).contains(&self.uploader.disk_threshold_percent) {
            return invalid("uploader.disk_threshold_percent must be between 0 and 100");
        }
        if let Some(addr) = &self.telemetry.prometheus_listen {
            if addr.parse::<SocketAddr>().is_err() {
                return Err(ConfigError::Invalid(format!(
                    "telemetry.prometheus_listen is not a socket address: {}",
                    addr
                )));
            }
        }
        Ok(())
    }

    /// Turn off services whose credentials are missing
    pub fn apply_credentials(&mut self) {
        let services = &mut self.services;

        if services.telegram_enabled
            && (services.telegram_bot_token.is_none() || services.telegram_chat_id.is_none())
        {
            tracing::warn!("Telegram credentials missing, disabling notifications");
            services.telegram_enabled = false;
        }

        if services.cloud_storage_enabled {
            let cloud = &services.cloud;
            if cloud.endpoint.is_none() || cloud.access_key.is_none() || cloud.secret_key.is_none() {
                tracing::warn!("Storage endpoint or credentials missing, disabling cloud upload");
                services.cloud_storage_enabled = false;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Derived values
    // ------------------------------------------------------------------------

    pub fn resolve(&self, path: &str) -> PathBuf {
        resolve_path(&self.base_dir, path)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.recorder.output_dir)
    }

    pub fn policy_file(&self) -> PathBuf {
        self.resolve(&self.policy.file)
    }

    pub fn uploads_online(&self) -> bool {
        self.services.internet_enabled && self.services.cloud_storage_enabled
    }

    pub fn notifications_online(&self) -> bool {
        self.services.internet_enabled && self.services.telegram_enabled
    }

    pub fn daypart(&self) -> DayPart {
        DayPart::new(self.policy.day_start_hour, self.policy.night_start_hour)
    }

    pub fn gate_config(&self) -> GateConfig {
        let fe = &self.feature_extractor;
        GateConfig {
            rms_threshold: fe.sad_threshold_rms,
            flux_threshold: fe.sad_threshold_flux,
            dbspl_threshold: fe.sad_threshold_dbspl,
            input_rate: self.audio.sample_rate,
            target_rate: fe.target_sample_rate,
            frame_len: fe.model_input_size,
            logging_confidence_threshold: fe.logging_confidence_threshold,
        }
    }

    /// One chunk period; a classifier slower than this would fall behind capture
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.audio.chunk_size as f64 / self.audio.sample_rate.max(1) as f64)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.policy.alert_cooldown_seconds).unwrap_or(Duration::ZERO)
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            sample_rate: self.audio.sample_rate,
            max_duration: Duration::from_secs_f64(self.recorder.max_duration_seconds),
            post_roll: Duration::from_secs_f64(self.recorder.post_roll_seconds),
            save_calibrated: self.recorder.save_calibrated,
        }
    }

    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy {
            max_bytes: self.uploader.rotation_size_bytes,
            max_age: self.uploader.rotation_age_seconds.map(Duration::from_secs),
        }
    }

    pub fn uploader_settings(&self) -> UploaderSettings {
        UploaderSettings {
            output_dir: self.output_dir(),
            rotation: self.rotation_policy(),
            retry_interval: Duration::from_secs(self.uploader.retry_interval_seconds),
            csv_check_interval: Duration::from_secs(self.uploader.csv_check_interval_seconds),
            disk_check_interval: Duration::from_secs(self.uploader.disk_check_interval_seconds),
            disk_threshold_percent: self.uploader.disk_threshold_percent,
        }
    }
}

/// Project root for `.acoustic-monitor/config.yaml`, else the file's directory
fn base_dir_for(config_path: &Path) -> PathBuf {
    let parent = config_path.parent().unwrap_or(Path::new("."));
    if parent.file_name().is_some_and(|n| n == CONFIG_DIR) {
        parent.parent().unwrap_or(Path::new(".")).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}
