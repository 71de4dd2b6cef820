#![forbid(unsafe_code)]

//! Outstanding-work accounting for drain and shutdown.
//!
//! [`WorkTracker`] counts tasks that were launched but have not yet run
//! their completion callback. [`wait_all`](WorkTracker::wait_all) blocks
//! until the count returns to zero. Nothing is ever abandoned: a task that
//! never finishes keeps `wait_all` blocked.
//!
//! # Task lifecycle
//!
//! ```text
//! created ─► registered ─► running ─┬─► completed ─┬─► deregistered
//!                                   └─► cancelled ─┘
//! ```
//!
//! `cancelled` is not terminal; the action is expected to notice and finish
//! with an error.

use std::sync::{Condvar, Mutex, PoisonError};
use web_time::{Duration, Instant};

/// Counted outstanding-work tracker.
#[derive(Debug, Default)]
pub struct WorkTracker {
    outstanding: Mutex<usize>,
    drained: Condvar,
}

impl WorkTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more task.
    pub fn begin(&self) {
        let mut n = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *n += 1;
    }

    /// Count one task as finished, waking drainers at zero.
    pub fn finish(&self) {
        let mut n = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        debug_assert!(*n > 0, "finish without begin");
        *n = n.saturating_sub(1);
        if *n == 0 {
            self.drained.notify_all();
        }
    }

    /// Current number of outstanding tasks.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        *self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until no task is outstanding.
    pub fn wait_all(&self) {
        let guard = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _guard = self
            .drained
            .wait_while(guard, |n| *n > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Like [`wait_all`](Self::wait_all) but gives up after `timeout`.
    ///
    /// Returns `true` if drained.
    pub fn wait_all_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *guard > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .drained
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_drained() {
        let tracker = WorkTracker::new();
        assert_eq!(tracker.outstanding(), 0);
        tracker.wait_all();
        assert!(tracker.wait_all_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn begin_finish_balance() {
        let tracker = WorkTracker::new();
        tracker.begin();
        tracker.begin();
        assert_eq!(tracker.outstanding(), 2);
        tracker.finish();
        tracker.finish();
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn wait_all_timeout_expires_while_busy() {
        let tracker = WorkTracker::new();
        tracker.begin();
        assert!(!tracker.wait_all_timeout(Duration::from_millis(10)));
        tracker.finish();
        assert!(tracker.wait_all_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn wait_all_wakes_when_last_task_finishes() {
        let tracker = Arc::new(WorkTracker::new());
        for _ in 0..8 {
            tracker.begin();
        }
        let handles: Vec<_> = (0..8_u64)
            .map(|i| {
                let t = Arc::clone(&tracker);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5 * i));
                    t.finish();
                })
            })
            .collect();

        tracker.wait_all();
        assert_eq!(tracker.outstanding(), 0);
        for h in handles {
            h.join().unwrap();
        }
    }
}
