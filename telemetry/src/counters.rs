use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Minimal counters for operational visibility into lock contention
/// (spec.md §4.1's advisory-lock retry/backoff path). Not a general metrics
/// layer — just the handful of numbers worth a quick glance without
/// grepping logs.
#[derive(Clone, Default)]
pub struct Counters {
    pub lock_acquired: Arc<AtomicU64>,
    pub lock_retried: Arc<AtomicU64>,
    pub lock_unavailable: Arc<AtomicU64>,
}

impl Counters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            lock_acquired: self.lock_acquired.load(Ordering::Relaxed),
            lock_retried: self.lock_retried.load(Ordering::Relaxed),
            lock_unavailable: self.lock_unavailable.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub lock_acquired: u64,
    pub lock_retried: u64,
    pub lock_unavailable: u64,
}
