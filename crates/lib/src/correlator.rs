//! Pending-response table: pairs replies arriving on the inbound webhook with the
//! request that is waiting for them.
//!
//! A delivery inserts `request_id -> text`. A waiter registers a [`Notify`] for its id
//! under the table lock, then suspends without holding the lock. The first successful
//! read removes the entry. Entries nobody consumes (the waiter already gave up) are
//! evicted once they are older than the retention period.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Default retention: twice the longest allowed wait.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("request_id is required")]
    MissingRequestId,
    #[error("response text is required")]
    EmptyResponse,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("no response for request {request_id} within {timeout:?}")]
    Timeout {
        request_id: String,
        timeout: Duration,
    },
}

struct PendingEntry {
    text: String,
    delivered_at: Instant,
}

#[derive(Default)]
struct TableInner {
    entries: HashMap<String, PendingEntry>,
    waiters: HashMap<String, Arc<Notify>>,
}

impl TableInner {
    fn evict_older_than(&mut self, retention: Duration, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.delivered_at) < retention);
        before - self.entries.len()
    }
}

/// Shared table of delivered-but-not-yet-consumed responses. One per gateway, shared by `Arc`.
pub struct PendingTable {
    inner: Mutex<TableInner>,
    retention: Duration,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            inner: Mutex::new(TableInner::default()),
            retention,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert (or overwrite) the response for `request_id` and wake its waiter, if any.
    /// Empty id or empty text is rejected and nothing is stored.
    pub fn deliver(&self, request_id: &str, text: impl Into<String>) -> Result<(), DeliveryError> {
        let text = text.into();
        if request_id.is_empty() {
            return Err(DeliveryError::MissingRequestId);
        }
        if text.is_empty() {
            return Err(DeliveryError::EmptyResponse);
        }
        let now = Instant::now();
        let mut g = self.lock();
        let evicted = g.evict_older_than(self.retention, now);
        if evicted > 0 {
            log::debug!("correlator: evicted {} expired entr(ies)", evicted);
        }
        let previous = g.entries.insert(
            request_id.to_string(),
            PendingEntry {
                text,
                delivered_at: now,
            },
        );
        if previous.is_some() {
            log::debug!("correlator: overwrote pending response for {}", request_id);
        }
        // notify_one stores a permit when the waiter is between registration and its first poll.
        if let Some(n) = g.waiters.get(request_id) {
            n.notify_one();
        }
        Ok(())
    }

    /// Remove and return the response for `request_id` if it has been delivered.
    pub fn take(&self, request_id: &str) -> Option<String> {
        self.lock().entries.remove(request_id).map(|e| e.text)
    }

    /// Wait until a response for `request_id` is delivered, then remove and return it.
    ///
    /// The deadline is measured from the call. On timeout the table is left as is; a later
    /// delivery for the id stays until evicted. Dropping the returned future abandons the wait.
    pub async fn await_and_consume(
        &self,
        request_id: &str,
        timeout: Duration,
    ) -> Result<String, WaitError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let notify = {
            let mut g = self.lock();
            if let Some(e) = g.entries.remove(request_id) {
                return Ok(e.text);
            }
            g.waiters
                .entry(request_id.to_string())
                .or_insert_with(|| Arc::new(Notify::new()))
                .clone()
        };
        let _registration = WaiterRegistration {
            table: self,
            request_id,
            notify: notify.clone(),
        };

        loop {
            let woke = tokio::time::timeout_at(deadline, notify.notified()).await;
            if let Some(text) = self.take(request_id) {
                return Ok(text);
            }
            if woke.is_err() {
                return Err(WaitError::Timeout {
                    request_id: request_id.to_string(),
                    timeout,
                });
            }
        }
    }

    /// Remove entries older than the retention period. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        self.lock().evict_older_than(self.retention, Instant::now())
    }

    /// Number of delivered responses not yet consumed or evicted.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of requests currently waiting.
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Spawn a task that calls [`evict_expired`](Self::evict_expired) every `interval`.
    /// Abort the handle on shutdown.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = self.evict_expired();
                if evicted > 0 {
                    log::debug!("correlator sweep: evicted {} expired entr(ies)", evicted);
                }
            }
        })
    }
}

/// Removes a waiter's notify handle when the wait ends (success, timeout, or the future is dropped).
struct WaiterRegistration<'a> {
    table: &'a PendingTable,
    request_id: &'a str,
    notify: Arc<Notify>,
}

impl Drop for WaiterRegistration<'_> {
    fn drop(&mut self) {
        let mut g = self.table.lock();
        if g
            .waiters
            .get(self.request_id)
            .is_some_and(|n| Arc::ptr_eq(n, &self.notify))
        {
            g.waiters.remove(self.request_id);
        }
    }
}
