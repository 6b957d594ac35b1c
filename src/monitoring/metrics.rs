/*!
 * Retry Metrics
 * Lock-free counters behind the retry queue's stats snapshot
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Point-in-time view of a retry queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryStats {
    /// Invocations parked right now
    pub pending: usize,
    /// Times an invocation was parked (a re-parked replay counts again)
    pub deferred_total: u64,
    /// Invocations popped and replayed
    pub replayed_total: u64,
    /// Releases that found nothing to replay
    pub idle_releases: u64,
    /// Deepest the queue has been
    pub peak_depth: usize,
}

/// Counters updated by the queue
#[derive(Debug, Default)]
pub(crate) struct RetryCounters {
    deferred: AtomicU64,
    replayed: AtomicU64,
    idle_releases: AtomicU64,
    peak_depth: AtomicUsize,
}

impl RetryCounters {
    pub(crate) fn record_deferred(&self, depth: usize) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
    }

    pub(crate) fn record_replayed(&self) {
        self.replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_idle_release(&self) {
        self.idle_releases.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, pending: usize) -> RetryStats {
        RetryStats {
            pending,
            deferred_total: self.deferred.load(Ordering::Relaxed),
            replayed_total: self.replayed.load(Ordering::Relaxed),
            idle_releases: self.idle_releases.load(Ordering::Relaxed),
            peak_depth: self.peak_depth.load(Ordering::Relaxed),
        }
    }
}
