// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! Cooperative cancellation contexts for operations.
//!
//! A [`Context`] is the read side: operations receive one and poll
//! [`is_cancelled`](Context::is_cancelled) or call [`check`](Context::check)
//! between units of work. A [`CancellationSource`] is the control side that
//! triggers cancellation.
//!
//! Sources form a tree. A source derived with
//! [`CancellationSource::child_of`] observes its own cancel trigger and the
//! trigger of every ancestor, and inherits the earliest deadline along the
//! chain:
//!
//! ```text
//!   caller ctx ──► task ctx (registered by the manager)
//!       │              │
//!   cancel() ────────► cancelled
//!                      │
//!                  cancel() on the task does not touch the caller ctx
//! ```
//!
//! Cancellation is never preemptive. An operation that ignores its context
//! simply runs to completion.
//!
//! # Example
//!
//! ```
//! use opmgr_core::context::{CancellationSource, Context};
//! use std::time::Duration;
//!
//! let root = CancellationSource::new();
//! let child = CancellationSource::child_of(&root.context());
//! let ctx = child.context();
//!
//! let worker = std::thread::spawn(move || {
//!     while !ctx.is_cancelled() {
//!         ctx.wait_timeout(Duration::from_millis(5));
//!     }
//! });
//!
//! root.cancel();
//! worker.join().unwrap();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use web_time::{Duration, Instant};

use crate::operation::OperationError;

/// A thread-safe, cloneable view of a cancellation signal.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

/// The control handle that triggers cancellation of a [`Context`] and every
/// context derived from it.
///
/// Dropping the source does **not** cancel the context. Cloning a source
/// yields a second trigger for the same context.
#[derive(Clone)]
pub struct CancellationSource {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    notify: (Mutex<()>, Condvar),
    children: Mutex<Vec<Weak<ContextInner>>>,
}

impl ContextInner {
    fn new(deadline: Option<Instant>) -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            deadline,
            notify: (Mutex::new(()), Condvar::new()),
            children: Mutex::new(Vec::new()),
        })
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let (lock, cvar) = &self.notify;
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            cvar.notify_all();
        }
        let children = std::mem::take(
            &mut *self
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl CancellationSource {
    /// Create a root source with no parent and no deadline.
    pub fn new() -> Self {
        Self {
            inner: ContextInner::new(None),
        }
    }

    /// Derive a source whose context is cancelled when either this source or
    /// any ancestor of `parent` is cancelled.
    pub fn child_of(parent: &Context) -> Self {
        Self::derive(parent, parent.deadline())
    }

    /// Derive a source that also expires at `deadline`.
    ///
    /// The effective deadline is the earlier of `deadline` and the deadline
    /// inherited from `parent`.
    pub fn with_deadline(parent: &Context, deadline: Instant) -> Self {
        let effective = match parent.deadline() {
            Some(inherited) if inherited < deadline => inherited,
            _ => deadline,
        };
        Self::derive(parent, Some(effective))
    }

    /// Derive a source that expires `timeout` from now.
    pub fn with_timeout(parent: &Context, timeout: Duration) -> Self {
        Self::with_deadline(parent, Instant::now() + timeout)
    }

    fn derive(parent: &Context, deadline: Option<Instant>) -> Self {
        let inner = ContextInner::new(deadline);
        {
            let mut children = parent
                .inner
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            children.retain(|w| w.strong_count() > 0);
            children.push(Arc::downgrade(&inner));
        }
        // A parent cancelled before the push above never sees this child.
        if parent.inner.cancelled.load(Ordering::Acquire) {
            inner.cancel();
        }
        Self { inner }
    }

    /// Obtain a cloneable context observing this source.
    pub fn context(&self) -> Context {
        Context {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Signal cancellation to this context and all of its descendants.
    ///
    /// Pending [`Context::wait_timeout`] calls wake immediately. Calling this
    /// more than once is harmless.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check whether [`cancel`](Self::cancel) has been triggered (directly or
    /// through an ancestor).
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSource")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            inner: ContextInner::new(None),
        }
    }

    /// Returns `true` once cancellation was requested or the deadline passed.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire) || self.inner.expired()
    }

    /// The effective deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline. `None` without a deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Convenience for operations: `ctx.check()?` between units of work.
    ///
    /// Explicit cancellation takes precedence over deadline expiry.
    pub fn check(&self) -> Result<(), OperationError> {
        if self.inner.cancelled.load(Ordering::Acquire) {
            Err(OperationError::Cancelled)
        } else if self.inner.expired() {
            Err(OperationError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Block until either cancellation is requested, the deadline passes, or
    /// `duration` elapses.
    ///
    /// Returns `true` if the context is cancelled, `false` on timeout.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let duration = match self.remaining() {
            Some(left) if left < duration => left,
            _ => duration,
        };
        let (lock, cvar) = &self.inner.notify;
        let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let start = Instant::now();
        let mut remaining = duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let (new_guard, result) = cvar
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            guard = new_guard;
            if self.is_cancelled() {
                return true;
            }
            if result.timed_out() {
                return false;
            }
            let elapsed = start.elapsed();
            if elapsed >= duration {
                return false;
            }
            remaining = duration - elapsed;
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn background_is_never_cancelled() {
        let ctx = Context::background();
        assert!(!ctx.is_cancelled());
        assert!(ctx.check().is_ok());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn cancel_propagates_to_context() {
        let source = CancellationSource::new();
        let ctx = source.context();
        source.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.check(), Err(OperationError::Cancelled)));
    }

    #[test]
    fn drop_source_does_not_cancel() {
        let source = CancellationSource::new();
        let ctx = source.context();
        drop(source);
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let source = CancellationSource::new();
        let ctx = source.context();
        source.cancel();
        source.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn parent_cancel_reaches_grandchildren() {
        let root = CancellationSource::new();
        let child = CancellationSource::child_of(&root.context());
        let grandchild = CancellationSource::child_of(&child.context());
        let ctx = grandchild.context();

        root.cancel();
        assert!(child.is_cancelled());
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn child_cancel_leaves_parent_alone() {
        let root = CancellationSource::new();
        let child = CancellationSource::child_of(&root.context());
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[test]
    fn child_of_cancelled_parent_starts_cancelled() {
        let root = CancellationSource::new();
        root.cancel();
        let child = CancellationSource::child_of(&root.context());
        assert!(child.context().is_cancelled());
    }

    #[test]
    fn siblings_are_independent() {
        let root = CancellationSource::new();
        let a = CancellationSource::child_of(&root.context());
        let b = CancellationSource::child_of(&root.context());
        a.cancel();
        assert!(!b.is_cancelled());
    }

    #[test]
    fn elapsed_deadline_reports_deadline_exceeded() {
        let source = CancellationSource::with_deadline(&Context::background(), Instant::now());
        let ctx = source.context();
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.check(), Err(OperationError::DeadlineExceeded)));
    }

    #[test]
    fn child_inherits_earlier_deadline() {
        let near = Instant::now() + Duration::from_secs(1);
        let far = near + Duration::from_secs(60);
        let parent = CancellationSource::with_deadline(&Context::background(), near);
        let child = CancellationSource::with_deadline(&parent.context(), far);
        assert_eq!(child.context().deadline(), Some(near));

        let plain = CancellationSource::child_of(&parent.context());
        assert_eq!(plain.context().deadline(), Some(near));
    }

    #[test]
    fn wait_timeout_returns_false_on_timeout() {
        let ctx = CancellationSource::new().context();
        assert!(!ctx.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn wait_timeout_stops_at_deadline() {
        let source =
            CancellationSource::with_timeout(&Context::background(), Duration::from_millis(20));
        let ctx = source.context();
        let start = Instant::now();
        assert!(ctx.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn wait_timeout_wakes_on_parent_cancel() {
        let root = CancellationSource::new();
        let child = CancellationSource::child_of(&root.context());
        let ctx = child.context();

        let handle = thread::spawn(move || ctx.wait_timeout(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(20));
        root.cancel();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn dropped_children_are_pruned() {
        let root = CancellationSource::new();
        for _ in 0..16 {
            let _ = CancellationSource::child_of(&root.context());
        }
        let _live = CancellationSource::child_of(&root.context());
        let children = root.inner.children.lock().unwrap();
        assert_eq!(children.iter().filter(|w| w.strong_count() > 0).count(), 1);
        assert!(children.len() <= 2);
    }
}
