//! Controller — watch, queue, and a pool of reconcile workers.
//!
//! Keys reach the queue from three places: the initial listing at startup,
//! store events (a pipeline changed, or a receiver/binding reported status for
//! it), and the periodic resync. Workers pull keys and run the engine; a
//! failed run goes back on the queue with per-key backoff, a successful one
//! resets that backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use pgsource_core::config::ControllerConfig;

use crate::cancel::Cancellation;
use crate::engine::{ReconcileEngine, ReconcileEvent};
use crate::queue::WorkQueue;
use crate::store::ResourceStore;

/// Lower bound on the resync period; `tokio::time::interval` rejects zero.
const MIN_RESYNC_INTERVAL: Duration = Duration::from_secs(1);

pub struct Controller {
    store: Arc<dyn ResourceStore>,
    engine: Arc<ReconcileEngine>,
    queue: WorkQueue,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(store: Arc<dyn ResourceStore>, engine: ReconcileEngine, config: ControllerConfig) -> Self {
        let queue = WorkQueue::new(config.backoff_base(), config.backoff_max());
        Self {
            store,
            engine: Arc::new(engine),
            queue,
            config,
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Enqueue every stored pipeline.
    pub fn resync(&self) {
        match self.store.list_keys() {
            Ok(keys) => {
                debug!(count = keys.len(), "resync");
                for key in keys {
                    self.queue.add(&key);
                }
            }
            Err(e) => error!(error = %e, "failed to list pipelines for resync"),
        }
    }

    /// Run until `shutdown` flips to true. In-flight runs are cancelled and
    /// every worker is joined before returning.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.store.subscribe();
        self.resync();

        let workers = self.config.workers.max(1);
        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let queue = self.queue.clone();
                let engine = self.engine.clone();
                let cancel = Cancellation::new(shutdown.clone());
                tokio::spawn(async move { worker(id, queue, engine, cancel).await })
            })
            .collect();
        let period = self.config.resync_interval().max(MIN_RESYNC_INTERVAL);
        info!(workers, resync = ?period, "controller started");

        let mut resync = tokio::time::interval(period);
        resync.tick().await;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        debug!(key = %event.pipeline_key, kind = ?event.kind, "store event");
                        self.queue.add(&event.pipeline_key);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "store events lagged, resyncing");
                        self.resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("store event channel closed");
                        break;
                    }
                },
                _ = resync.tick() => self.resync(),
                _ = shutdown.changed() => {
                    info!("controller shutting down");
                    break;
                }
            }
        }

        self.queue.shut_down();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "reconcile worker panicked");
            }
        }
        info!("controller stopped");
    }
}

async fn worker(id: usize, queue: WorkQueue, engine: Arc<ReconcileEngine>, cancel: Cancellation) {
    debug!(worker = id, "reconcile worker started");
    while let Some(key) = queue.get().await {
        match engine.reconcile(&key, &cancel).await {
            Ok(event) => {
                queue.forget(&key);
                if event == ReconcileEvent::AwaitingDependencies {
                    debug!(%key, "waiting on receiver or binding");
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                let delay = queue.add_rate_limited(&key);
                debug!(%key, error = %e, retry_in = ?delay, "requeued");
            }
        }
        queue.done(&key);
    }
    debug!(worker = id, "reconcile worker stopped");
}
