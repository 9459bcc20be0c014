//! Global cancellation signal for in-flight pipeline work.
//!
//! The orchestrator holds a [`ShutdownHandle`]; workers carry a cheap
//! [`Shutdown`] clone and check it at their suspension points (before a fetch,
//! between retries, before a parse). A cancelled worker abandons its current
//! item rather than committing a half-finished result, so the item stays
//! retryable on the next run.

use std::sync::Arc;

use tokio::sync::watch;

/// Sender half: triggers cancellation for every [`Shutdown`] clone.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// Receiver half carried by workers.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
    /// Keeps the channel open for signals without an orchestrator,
    /// so [`Shutdown::cancelled`] pends instead of completing.
    _guard: Option<Arc<watch::Sender<bool>>>,
}

/// Creates a linked handle/signal pair.
#[must_use]
pub fn channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx, _guard: None })
}

impl ShutdownHandle {
    /// Signals all workers to abandon their current item.
    pub fn trigger(&self) {
        // Receivers may all have been dropped already; that is fine.
        let _ = self.tx.send(true);
    }
}

impl Shutdown {
    /// Returns a signal that never fires, for callers without an orchestrator.
    #[must_use]
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _guard: Some(Arc::new(tx)),
        }
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Suspends until cancellation is requested.
    ///
    /// Completes immediately if the handle was already triggered or dropped.
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        // A closed channel means the handle is gone; treat it as cancelled
        // so workers never hang on an orphaned signal.
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
    }
}
