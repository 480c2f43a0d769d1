//! Privacy mode switch.
//!
//! Privacy is on when the config says so or while the flag file exists. The
//! flag half is refreshed by the reload worker and read by the pipeline.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct PrivacySwitch {
    configured: bool,
    flag: Arc<AtomicBool>,
}

impl PrivacySwitch {
    pub fn new(configured: bool) -> Self {
        Self {
            configured,
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.configured || self.flag.load(Ordering::Relaxed)
    }

    pub fn set_flag(&self, on: bool) {
        let previous = self.flag.swap(on, Ordering::Relaxed);
        if previous != on {
            tracing::info!("Privacy flag {}", if on { "raised" } else { "cleared" });
        }
    }

    /// Sync the flag with the existence of `path`
    pub fn refresh_from_file(&self, path: &Path) {
        self.set_flag(path.exists());
    }
}
