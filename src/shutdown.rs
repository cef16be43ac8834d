//! Cooperative shutdown signal
//!
//! One `Shutdown` is created at startup and cloned into every loop and
//! stream reader. Loops check `is_running()` at iteration boundaries;
//! sleeps and stream reads race against `cancelled()` so they wake up
//! immediately on stop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Cloneable cancellation handle
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal every holder to stop
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        !*self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // An error means the sender is gone, which only happens at teardown
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep for `duration`; returns false if shutdown arrived first
    pub async fn sleep(&self, duration: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }

    /// Run `fut` unless shutdown arrives first
    pub async fn run_until_cancelled<F: Future>(&self, fut: F) -> Option<F::Output> {
        if !self.is_running() {
            return None;
        }
        tokio::select! {
            out = fut => Some(out),
            _ = self.cancelled() => None,
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
