//! Delivery metrics.
//!
//! [`Counter`] is an atomic monotonic counter. [`BackendMetrics`] groups the
//! counters the publisher keeps per backend; [`BackendSnapshot`] is a plain
//! serializable copy of them for logs and JSONL output.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// A monotonically increasing counter backed by [`AtomicU64`].
///
/// Relaxed ordering: these are statistics, never used for synchronization.
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Counter").field(&self.get()).finish()
    }
}

/// Per-backend counters kept by the publisher.
#[derive(Debug, Default)]
pub struct BackendMetrics {
    /// `store` calls issued.
    pub store_attempts: Counter,
    /// `store` calls not observed by the following `holds` check.
    pub dropped_writes: Counter,
    /// Messages newly added to the confirmation set.
    pub confirmations: Counter,
    /// Sends skipped because the message was already confirmed.
    pub memo_hits: Counter,
    /// Unix ms of the last dropped write (0 = never).
    last_failure_ms: AtomicU64,
}

impl BackendMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dropped write observed at `now` (Unix ms).
    pub fn record_drop(&self, now: u64) {
        self.dropped_writes.inc();
        self.last_failure_ms.fetch_max(now, Ordering::Relaxed);
    }

    pub fn last_failure_ms(&self) -> Option<u64> {
        match self.last_failure_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn snapshot(&self, backend: &str) -> BackendSnapshot {
        BackendSnapshot {
            backend: backend.to_string(),
            store_attempts: self.store_attempts.get(),
            dropped_writes: self.dropped_writes.get(),
            confirmations: self.confirmations.get(),
            memo_hits: self.memo_hits.get(),
            last_failure_ms: self.last_failure_ms(),
        }
    }
}

/// Point-in-time copy of a backend's metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendSnapshot {
    pub backend: String,
    pub store_attempts: u64,
    pub dropped_writes: u64,
    pub confirmations: u64,
    pub memo_hits: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_ms: Option<u64>,
}
