//! Keyed, deduplicating work queue.
//!
//! - A key is delivered to at most one worker at a time.
//! - Adding a key that is already queued is a no-op.
//! - Adding a key while it is being processed marks it dirty; it is
//!   re-queued when the worker calls [`WorkQueue::done`].
//! - [`WorkQueue::add_rate_limited`] re-adds after a per-key exponential
//!   backoff (base doubling up to a cap), reset by [`WorkQueue::forget`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
struct Inner {
    queue: VecDeque<String>,
    /// Keys waiting for delivery, queued or parked behind an in-flight run.
    dirty: HashSet<String>,
    processing: HashSet<String>,
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    notify: Notify,
    backoff_base: Duration,
    backoff_max: Duration,
}

#[derive(Clone)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

impl WorkQueue {
    pub fn new(backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                notify: Notify::new(),
                backoff_base,
                backoff_max,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, key: &str) {
        let mut inner = self.lock();
        if inner.shutting_down || !inner.dirty.insert(key.to_string()) {
            return;
        }
        if inner.processing.contains(key) {
            debug!(%key, "key in flight, marked dirty");
            return;
        }
        inner.queue.push_back(key.to_string());
        drop(inner);
        self.shared.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed.
    pub fn add_after(&self, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key);
        });
    }

    /// Re-add `key` after its backoff delay and return that delay.
    pub fn add_rate_limited(&self, key: &str) -> Duration {
        let delay = {
            let mut inner = self.lock();
            let failures = inner.failures.entry(key.to_string()).or_insert(0);
            *failures += 1;
            self.backoff_for(*failures)
        };
        self.add_after(key, delay);
        delay
    }

    fn backoff_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.shared
            .backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.shared.backoff_max)
    }

    /// Reset the backoff of `key`.
    pub fn forget(&self, key: &str) {
        self.lock().failures.remove(key);
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if inner.shutting_down {
                    return None;
                }
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Finish processing `key`, re-queueing it if it was added meanwhile.
    pub fn done(&self, key: &str) {
        let mut inner = self.lock();
        inner.processing.remove(key);
        if inner.dirty.contains(key) && !inner.shutting_down {
            inner.queue.push_back(key.to_string());
            drop(inner);
            self.shared.notify.notify_one();
        }
    }

    /// Number of keys waiting for delivery.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop delivering keys and wake every waiting worker.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.shared.notify.notify_waiters();
    }
}
