//! Policy hot reload.
//!
//! The reloader polls the policy file's modification time and republishes the
//! compiled rule set through a watch channel. A filesystem watcher on the
//! parent directory wakes it early. A file that fails to compile is logged and
//! the previous rule set stays in force.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use tokio::sync::{mpsc, watch};

use super::privacy::PrivacySwitch;
use super::rules::RuleSet;
use crate::core::shutdown::Shutdown;

/// Result of one reload check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    Unchanged,
    Reloaded(usize),
    Failed,
}

pub struct PolicyReloader {
    path: PathBuf,
    interval: Duration,
    tx: watch::Sender<Arc<RuleSet>>,
    last_modified: Option<SystemTime>,
    privacy: PrivacySwitch,
    privacy_flag: Option<PathBuf>,
}

impl PolicyReloader {
    /// Publish `initial` and return the reloader plus a receiver for the engine
    pub fn new(
        path: impl Into<PathBuf>,
        initial: RuleSet,
        interval: Duration,
        privacy: PrivacySwitch,
        privacy_flag: Option<PathBuf>,
    ) -> (Self, watch::Receiver<Arc<RuleSet>>) {
        let path = path.into();
        let last_modified = modified_time(&path);
        let (tx, rx) = watch::channel(Arc::new(initial));

        (
            Self {
                path,
                interval,
                tx,
                last_modified,
                privacy,
                privacy_flag,
            },
            rx,
        )
    }

    /// Recompile if the file changed since the last check
    pub fn check_once(&mut self) -> ReloadOutcome {
        if let Some(flag) = &self.privacy_flag {
            self.privacy.refresh_from_file(flag);
        }

        let modified = modified_time(&self.path);
        if modified.is_none() || modified == self.last_modified {
            return ReloadOutcome::Unchanged;
        }
        self.last_modified = modified;

        match RuleSet::load(&self.path) {
            Ok(set) => {
                let count = set.len();
                self.tx.send_replace(Arc::new(set));
                tracing::info!("Reloaded {} policies from {}", count, self.path.display());
                ReloadOutcome::Reloaded(count)
            }
            Err(e) => {
                tracing::warn!("Failed to reload policies, keeping previous set: {}", e);
                ReloadOutcome::Failed
            }
        }
    }

    /// Poll until shutdown
    pub async fn run(mut self, shutdown: Shutdown) {
        let (wake_tx, mut wake_rx) = mpsc::unbounded_channel::<()>();

        // Keep the debouncer alive for the lifetime of the loop
        let debouncer = match self.path.parent() {
            Some(dir) if dir.as_os_str().is_empty() || dir.is_dir() => {
                let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
                match new_debouncer(Duration::from_millis(500), move |_res: DebounceEventResult| {
                    let _ = wake_tx.send(());
                }) {
                    Ok(mut debouncer) => {
                        match debouncer.watcher().watch(dir, RecursiveMode::NonRecursive) {
                            Ok(()) => Some(debouncer),
                            Err(e) => {
                                tracing::warn!("Failed to watch {}: {}", dir.display(), e);
                                None
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to create policy watcher: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };
        let mut watching = debouncer.is_some();

        tracing::info!(
            "Watching {} for policy changes (every {:?})",
            self.path.display(),
            self.interval
        );

        enum Wake {
            Stop,
            Check,
            WatcherGone,
        }

        loop {
            let wake = tokio::select! {
                stopped = shutdown.wait(self.interval) => {
                    if stopped { Wake::Stop } else { Wake::Check }
                }
                msg = wake_rx.recv(), if watching => match msg {
                    Some(()) => Wake::Check,
                    None => Wake::WatcherGone,
                },
            };

            match wake {
                Wake::Stop => break,
                Wake::Check => {
                    self.check_once();
                }
                Wake::WatcherGone => watching = false,
            }
        }

        tracing::debug!("Policy reloader stopped");
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
