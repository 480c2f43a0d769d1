//! Alert delivery for `AlertNotify` actions.
//!
//! The pipeline thread only enqueues; a tokio worker does the network call.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::adapters::Notifier;
use crate::core::shutdown::Shutdown;

/// Non-blocking handle used from the pipeline thread
#[derive(Debug, Clone)]
pub struct AlertSender {
    tx: mpsc::Sender<String>,
}

impl AlertSender {
    /// Returns false if the alert was dropped
    pub fn send(&self, text: String) -> bool {
        match self.tx.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::error!("Alert queue full, alert dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Alert worker gone, alert dropped");
                false
            }
        }
    }
}

pub fn channel(capacity: usize) -> (AlertSender, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(capacity);
    (AlertSender { tx }, rx)
}

/// Alert text for one matching cycle
pub fn alert_text(rule: &str, label: &str, confidence: f64, dbspl: f64) -> String {
    format!(
        "Alert [{}]: {} ({:.0}%) at {:.1} dB SPL",
        rule,
        label,
        confidence * 100.0,
        dbspl
    )
}

/// Deliver queued alerts until shutdown. Without a notifier they are only logged.
pub async fn run_alert_worker(
    notifier: Option<Arc<dyn Notifier>>,
    mut rx: mpsc::Receiver<String>,
    shutdown: Shutdown,
) {
    loop {
        let text = tokio::select! {
            text = rx.recv() => text,
            _ = shutdown.triggered() => None,
        };
        let Some(text) = text else {
            break;
        };

        match &notifier {
            Some(notifier) => {
                if let Err(e) = notifier.notify(&text).await {
                    tracing::warn!("Failed to deliver alert via {}: {:#}", notifier.name(), e);
                }
            }
            None => tracing::info!("Alert (notifications disabled): {}", text),
        }
    }
    tracing::debug!("Alert worker stopped");
}
