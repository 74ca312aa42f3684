//! Expiry scheduling
//!
//! One-shot deadline timers keyed by transfer id. The engine schedules a
//! timer at `prepare` and drops it when the transfer reaches a terminal
//! state; a timer that fires re-checks the record before doing anything,
//! so a late cancellation is always harmless.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Deadline queue of pending transfer expirations
#[derive(Default)]
pub struct ExpiryScheduler {
    timers: Arc<DashMap<Uuid, tokio::task::AbortHandle>>,
}

impl ExpiryScheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `on_expire` to run once at `expires_at`
    ///
    /// A deadline already in the past fires immediately. Scheduling the
    /// same id again replaces the previous timer.
    pub fn schedule<F, Fut>(&self, id: Uuid, expires_at: DateTime<Utc>, on_expire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = (expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let timers = Arc::clone(&self.timers);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_expire().await;
            timers.remove(&id);
        });
        if let Some(previous) = self.timers.insert(id, task.abort_handle()) {
            previous.abort();
        }
    }

    /// Drop the timer for a transfer that reached a terminal state
    pub fn cancel(&self, id: &Uuid) {
        if let Some((_, handle)) = self.timers.remove(id) {
            handle.abort();
        }
    }

    /// Abort every pending timer (used at disconnect)
    pub fn clear(&self) {
        self.timers.retain(|_, handle| {
            handle.abort();
            false
        });
    }

    /// Number of timers currently pending
    pub fn pending(&self) -> usize {
        self.timers.len()
    }
}
