//! Liveness heartbeat: log line, status LED blink and remote ping.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::core::shutdown::Shutdown;

pub const BLINK_DURATION: Duration = Duration::from_millis(100);
pub const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// A status indicator the heartbeat can toggle
pub trait StatusLed: Send + Sync {
    fn set(&self, on: bool) -> Result<()>;
}

/// Used when no LED is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLed;

impl StatusLed for NoopLed {
    fn set(&self, _on: bool) -> Result<()> {
        Ok(())
    }
}

/// GPIO LED driven through the sysfs interface
#[derive(Debug, Clone)]
pub struct SysfsLed {
    value_path: PathBuf,
}

impl SysfsLed {
    const GPIO_ROOT: &'static str = "/sys/class/gpio";

    /// Export `pin` and configure it as an output
    pub fn open(pin: u32) -> Result<Self> {
        let root = PathBuf::from(Self::GPIO_ROOT);
        let pin_dir = root.join(format!("gpio{}", pin));

        if !pin_dir.exists() {
            std::fs::write(root.join("export"), pin.to_string())
                .with_context(|| format!("Failed to export GPIO {}", pin))?;
        }
        std::fs::write(pin_dir.join("direction"), "out")
            .with_context(|| format!("Failed to configure GPIO {}", pin))?;

        Ok(Self {
            value_path: pin_dir.join("value"),
        })
    }
}

impl StatusLed for SysfsLed {
    fn set(&self, on: bool) -> Result<()> {
        std::fs::write(&self.value_path, if on { "1" } else { "0" })
            .with_context(|| format!("Failed to write {}", self.value_path.display()))
    }
}

/// Pick the sysfs LED when a pin is configured, falling back to no LED
pub fn status_led(pin: Option<u32>) -> Box<dyn StatusLed> {
    match pin.map(SysfsLed::open) {
        Some(Ok(led)) => {
            tracing::info!("GPIO heartbeat enabled on pin {:?}", pin);
            Box::new(led)
        }
        Some(Err(e)) => {
            tracing::warn!("GPIO unavailable, skipping LED heartbeat: {:#}", e);
            Box::new(NoopLed)
        }
        None => Box::new(NoopLed),
    }
}

pub struct HealthMonitor {
    led: Box<dyn StatusLed>,
    ping_url: Option<String>,
    client: reqwest::Client,
}

impl HealthMonitor {
    /// `ping_url` is only used when the network is enabled
    pub fn new(led: Box<dyn StatusLed>, ping_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PING_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            led,
            ping_url,
            client,
        }
    }

    /// On, off, on, off. Returns early on shutdown.
    pub async fn double_blink(&self, shutdown: &Shutdown) {
        const PATTERN: [bool; 4] = [true, false, true, false];
        for (i, on) in PATTERN.into_iter().enumerate() {
            if let Err(e) = self.led.set(on) {
                tracing::debug!("LED write failed: {:#}", e);
                return;
            }
            if i + 1 < PATTERN.len() && shutdown.wait(BLINK_DURATION).await {
                let _ = self.led.set(false);
                return;
            }
        }
    }

    async fn ping(&self, url: &str) {
        match self.client.get(url).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!("Heartbeat ping returned {}", response.status());
            }
            Ok(_) => tracing::debug!("Heartbeat ping sent"),
            Err(e) => tracing::warn!("Heartbeat ping failed: {}", e),
        }
    }

    pub async fn beat(&self, shutdown: &Shutdown) {
        tracing::info!("System heartbeat: ALIVE");
        self.double_blink(shutdown).await;
        if let Some(url) = &self.ping_url {
            self.ping(url).await;
        }
    }

    pub async fn run(self, interval: Duration, shutdown: Shutdown) {
        loop {
            self.beat(&shutdown).await;
            if shutdown.wait(interval).await {
                break;
            }
        }
        let _ = self.led.set(false);
        tracing::debug!("Health monitor stopped");
    }
}
