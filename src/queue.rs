// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Rate-limited, deduplicating work queues and the worker loop draining them.

use crate::constants::backoff;
use crate::error::Result;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::error;

/// A deduplicating FIFO of work keys with per-key retry backoff.
///
/// A key that is enqueued while already pending collapses into the existing
/// item. A key that is enqueued while being processed is held back and
/// redelivered exactly once after the in-flight processing completes.
pub struct WorkQueue {
    name: &'static str,
    state: Mutex<State>,
    notify: Notify,
    /// Self-handle for the delayed re-add tasks spawned by `add_rate_limited`.
    this: Weak<WorkQueue>,
}

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    /// Keys waiting for delivery, including any held back behind an
    /// in-flight processing of the same key.
    dirty: HashSet<String>,
    /// Keys currently handed out to the worker.
    processing: HashSet<String>,
    /// Consecutive delivery attempts per key, cleared by `forget`.
    attempts: HashMap<String, u32>,
    shutting_down: bool,
}

impl WorkQueue {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueue a key immediately, coalescing with any pending occurrence.
    pub fn add(&self, key: String) {
        let mut state = self.state.lock().unwrap();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Enqueue a key after its backoff delay, counting the attempt.
    pub fn add_rate_limited(&self, key: String) {
        let delay = {
            let mut state = self.state.lock().unwrap();
            if state.shutting_down {
                return;
            }
            let attempts = state.attempts.entry(key.clone()).or_insert(0);
            *attempts += 1;
            backoff_delay(*attempts)
        };
        let Some(queue) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Fetch the next key, suspending until one is available.
    ///
    /// Returns `None` once the queue has been shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark a key's processing finished, redelivering it if it was
    /// re-enqueued in the meantime.
    pub fn done(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Reset the retry state of a key after successful processing.
    pub fn forget(&self, key: &str) {
        self.state.lock().unwrap().attempts.remove(key);
    }

    /// Stop accepting work and wake any blocked fetch.
    pub fn shut_down(&self) {
        self.state.lock().unwrap().shutting_down = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    #[cfg(test)]
    pub(crate) fn attempts(&self, key: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .attempts
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

/// Exponential backoff for the given attempt count: 5ms, 10ms, 20ms, ...
/// capped at [`backoff::MAX_DELAY_SECS`].
fn backoff_delay(attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(63);
    let millis = backoff::BASE_DELAY_MS.saturating_mul(1u64.checked_shl(exp).unwrap_or(u64::MAX));
    Duration::from_millis(millis).min(Duration::from_secs(backoff::MAX_DELAY_SECS))
}

/// Drain a queue until shutdown, dispatching each key to the handler.
///
/// Success resets the key's retry state; an error re-enqueues the key with
/// backoff and the loop continues.
pub async fn run_worker<F, Fut>(queue: Arc<WorkQueue>, handler: F)
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    while let Some(key) = queue.get().await {
        match handler(key.clone()).await {
            Ok(()) => queue.forget(&key),
            Err(e) => {
                error!("error syncing '{}' in {} queue: {}, requeuing", key, queue.name(), e);
                queue.add_rate_limited(key.clone());
            }
        }
        queue.done(&key);
    }
}
