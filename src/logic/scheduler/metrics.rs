//! Scheduler counters for the operations dashboard

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use super::governor::PressureLevel;

#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub(crate) submitted: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) retried: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) timed_out: AtomicU64,
    pub(crate) fast_mode_admissions: AtomicU64,
    pub(crate) active: AtomicUsize,
}

impl SchedulerMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, queue_depth: usize, workers: usize, pressure: PressureLevel) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_depth,
            workers,
            active: self.active.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            fast_mode_admissions: self.fast_mode_admissions.load(Ordering::Relaxed),
            pressure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub queue_depth: usize,
    pub workers: usize,
    pub active: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub retried: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    pub fast_mode_admissions: u64,
    pub pressure: PressureLevel,
}
