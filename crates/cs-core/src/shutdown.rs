use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// ShutdownSignal
// ---------------------------------------------------------------------------

/// Cooperative shutdown for the queue worker, the change observer and the
/// HTTP server.
///
/// Loops `select!` on [`ShutdownSignal::subscribe`] next to their tick. An
/// in-flight sync operation (including its retry backoff) is never
/// interrupted: the loop only observes the signal between operations.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    trigger: broadcast::Sender<()>,
    shutting_down: Arc<AtomicBool>,
    stopped_tx: Arc<watch::Sender<usize>>,
    stopped_rx: watch::Receiver<usize>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (trigger, _) = broadcast::channel(1);
        let (stopped_tx, stopped_rx) = watch::channel(0);
        Self {
            trigger,
            shutting_down: Arc::new(AtomicBool::new(false)),
            stopped_tx: Arc::new(stopped_tx),
            stopped_rx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.trigger.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Signal every subscriber. Repeated calls are no-ops.
    pub fn trigger(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            info!("shutdown requested");
            let _ = self.trigger.send(());
        }
    }

    /// Resolves once shutdown has been triggered.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        if self.is_shutting_down() {
            return;
        }
        let _ = rx.recv().await;
    }

    /// Record that one loop has exited.
    pub fn mark_stopped(&self) {
        self.stopped_tx.send_modify(|n| *n += 1);
    }

    /// Wait until `expected` loops called [`mark_stopped`](Self::mark_stopped).
    /// Returns false if `timeout` elapsed first.
    pub async fn wait_stopped(&mut self, expected: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let current = *self.stopped_rx.borrow();
            if current >= expected {
                return true;
            }
            match tokio::time::timeout_at(deadline, self.stopped_rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return *self.stopped_rx.borrow() >= expected,
                Err(_) => {
                    warn!(stopped = current, expected, "shutdown timed out waiting for loops");
                    return false;
                }
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_is_idempotent_and_shared() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_shutting_down());
        signal.trigger();
        signal.trigger();
        assert!(clone.is_shutting_down());
    }

    #[tokio::test]
    async fn wait_returns_after_trigger() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn wait_stopped_counts_loops() {
        let mut signal = ShutdownSignal::new();
        let a = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            a.mark_stopped();
        });
        signal.mark_stopped();
        assert!(signal.wait_stopped(2, Duration::from_secs(1)).await);
        assert!(!signal.wait_stopped(3, Duration::from_millis(20)).await);
    }
}
