#![forbid(unsafe_code)]

//! Per-manager task counters.
//!
//! Counters are monotonic and owned by one manager instance, so two managers
//! in the same process never see each other's numbers.

use std::sync::atomic::{AtomicU64, Ordering};

use opmgr_core::OperationError;

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    launched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    panicked: AtomicU64,
    rejected: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn launched(&self) {
        self.launched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn completed(&self, error: Option<&OperationError>) {
        let counter = match error {
            None => &self.succeeded,
            Some(OperationError::Panicked(_)) => &self.panicked,
            Some(e) if e.is_cancellation() => &self.cancelled,
            Some(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ManagerStats {
        ManagerStats {
            launched: self.launched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of a manager's counters.
///
/// `succeeded + failed + cancelled + panicked` counts finished actions,
/// including synchronous ones; `launched` counts only tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManagerStats {
    /// Tasks started by `execute`/`undo`/`redo` and their `_last` variants.
    pub launched: u64,
    /// Actions that returned `Ok`.
    pub succeeded: u64,
    /// Actions that returned a non-cancellation error.
    pub failed: u64,
    /// Actions that returned `Cancelled` or `DeadlineExceeded`.
    pub cancelled: u64,
    /// Actions that panicked.
    pub panicked: u64,
    /// Requests refused before any action ran.
    pub rejected: u64,
}

impl ManagerStats {
    /// Actions that ran to an outcome.
    #[must_use]
    pub fn finished(&self) -> u64 {
        self.succeeded + self.failed + self.cancelled + self.panicked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_buckets() {
        let stats = StatsCounters::default();
        stats.completed(None);
        stats.completed(Some(&OperationError::failed("x")));
        stats.completed(Some(&OperationError::Cancelled));
        stats.completed(Some(&OperationError::DeadlineExceeded));
        stats.completed(Some(&OperationError::Panicked("p".into())));
        stats.rejected();

        let snap = stats.snapshot();
        assert_eq!(snap.succeeded, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.cancelled, 2);
        assert_eq!(snap.panicked, 1);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.finished(), 5);
    }
}
