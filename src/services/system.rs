//! Host health sampling and the hourly `SystemCheck` row.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Local;
use sysinfo::{Components, System};

use crate::config::paths;
use crate::core::shutdown::Shutdown;
use crate::core::telemetry;
use crate::domain::{MetricsRow, SystemSnapshot};
use crate::uploader::disk_guard::used_percent;
use crate::uploader::MetricsCsv;

/// Delay before the first heartbeat row, so the other workers settle
pub const HEARTBEAT_SETTLE: Duration = Duration::from_secs(10);

/// Latest host snapshot, shared between the sampler and its readers
#[derive(Debug, Clone, Default)]
pub struct SystemStats {
    inner: Arc<Mutex<SystemSnapshot>>,
}

impl SystemStats {
    fn lock(&self) -> MutexGuard<'_, SystemSnapshot> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> SystemSnapshot {
        *self.lock()
    }

    pub fn update(&self, snapshot: SystemSnapshot) {
        *self.lock() = snapshot;
    }
}

/// Reads CPU, RAM and temperature from `sysinfo` and disk usage from `fs2`
pub struct SystemSampler {
    system: System,
    components: Components,
    data_dir: PathBuf,
    attached_dir: Option<PathBuf>,
}

impl SystemSampler {
    pub fn new(data_dir: PathBuf, attached_dir: Option<PathBuf>) -> Self {
        let mut system = System::new();
        // CPU usage is a delta; prime it so the first real sample is meaningful
        system.refresh_cpu();
        Self {
            system,
            components: Components::new_with_refreshed_list(),
            data_dir,
            attached_dir,
        }
    }

    pub fn sample(&mut self) -> SystemSnapshot {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.components.refresh();

        let total = self.system.total_memory();
        let ram_percent = if total == 0 {
            0.0
        } else {
            self.system.used_memory() as f64 / total as f64 * 100.0
        };

        SystemSnapshot {
            cpu_percent: self.system.global_cpu_info().cpu_usage() as f64,
            ram_percent,
            temp_celsius: self.cpu_temperature(),
            disk_percent: disk_percent(Some(&self.data_dir)),
            disk_attached_percent: disk_percent(self.attached_dir.as_ref()),
        }
    }

    fn cpu_temperature(&self) -> f64 {
        let mut fallback = None;
        for component in &self.components {
            let label = component.label().to_lowercase();
            if label.contains("cpu") || label.contains("soc") || label.contains("package") {
                return component.temperature() as f64;
            }
            fallback.get_or_insert(component.temperature() as f64);
        }
        fallback.unwrap_or(0.0)
    }
}

fn disk_percent(path: Option<&PathBuf>) -> f64 {
    let Some(path) = path else {
        return 0.0;
    };
    match (fs2::total_space(path), fs2::available_space(path)) {
        (Ok(total), Ok(available)) => used_percent(total, available),
        _ => 0.0,
    }
}

/// Refresh `stats` and the host gauges every `interval`
pub async fn run_sampler(
    mut sampler: SystemSampler,
    stats: SystemStats,
    interval: Duration,
    shutdown: Shutdown,
) {
    loop {
        let snapshot = sampler.sample();
        telemetry::publish_system(&snapshot);
        stats.update(snapshot);

        if shutdown.wait(interval).await {
            break;
        }
    }
    tracing::debug!("System sampler stopped");
}

/// Append a `SystemCheck` row every `interval`, if the CSV already exists
pub async fn run_heartbeat_rows(
    csv: MetricsCsv,
    stats: SystemStats,
    interval: Duration,
    shutdown: Shutdown,
) {
    if shutdown.wait(HEARTBEAT_SETTLE).await {
        return;
    }

    loop {
        let row = MetricsRow::system_check(paths::heartbeat_id(), Local::now(), stats.snapshot());
        match csv.append_if_exists(&row).await {
            Ok(true) => tracing::debug!("Logged system heartbeat row"),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to log system heartbeat: {:#}", e),
        }

        if shutdown.wait(interval).await {
            break;
        }
    }
    tracing::debug!("System heartbeat stopped");
}
