//! Cooperative shutdown signal shared by every worker.
//!
//! Workers sleep through [`Shutdown::wait`] instead of `tokio::time::sleep`,
//! so a stop request interrupts the sleep immediately. Dropping the trigger
//! also counts as a stop.

use std::time::Duration;

use tokio::sync::watch;

/// Sending half, held by whoever owns the process lifetime
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiving half, cloned into every worker
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Create a linked trigger/signal pair
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    /// Non-blocking check, usable from synchronous threads
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Sleep for `duration` or until shutdown. Returns true if shutdown won.
    pub async fn wait(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }

        let mut rx = self.rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            stopped = rx.wait_for(|stop| *stop) => {
                // Err means the trigger was dropped
                stopped.map(|_| true).unwrap_or(true)
            }
        }
    }

    /// Resolve once shutdown is requested
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}
