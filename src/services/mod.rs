//! Background services around the pipeline: host sampling, liveness and alerts.

pub mod alerts;
pub mod health;
pub mod system;

pub use alerts::{alert_text, AlertSender};
pub use health::{status_led, HealthMonitor, NoopLed, StatusLed, SysfsLed};
pub use system::{SystemSampler, SystemStats};
