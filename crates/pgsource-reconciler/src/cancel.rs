//! Cooperative cancellation for reconcile runs.
//!
//! Wraps the daemon's `watch::Receiver<bool>` shutdown signal. Every database
//! and collaborator call made by the engines goes through
//! [`Cancellation::guard`], so a shutdown interrupts a run between (or during)
//! stages instead of waiting for it to finish.

use std::future::Future;

use tokio::sync::watch;

use crate::error::{ReconcileError, ReconcileResult};

#[derive(Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is signalled. Never resolves if the sender is
    /// dropped without signalling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run `fut` unless shutdown is signalled first.
    pub async fn guard<T, E, F>(&self, fut: F) -> ReconcileResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<ReconcileError>,
    {
        if self.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ReconcileError::Cancelled),
            result = fut => result.map_err(Into::into),
        }
    }
}
