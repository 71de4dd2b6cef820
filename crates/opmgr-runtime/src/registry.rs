#![forbid(unsafe_code)]

//! Registry of in-flight tasks and their cancellation triggers.
//!
//! Every launched task gets a [`TaskId`] and a [`CancellationSource`] derived
//! from the caller's context. The registry owns the source for as long as the
//! task is live; removing the entry is what "deregistered" means.
//!
//! Cancellation and natural completion race benignly: whichever removes the
//! entry first wins and the other is a no-op.

use std::collections::BTreeMap;
use std::fmt;

use opmgr_core::{CancellationSource, Context, OpId};

/// Sequence id of a registered task, unique among live tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Which action a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Execute,
    Undo,
    Redo,
}

impl Action {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Undo => "undo",
            Self::Redo => "redo",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct RegisteredTask {
    source: CancellationSource,
    op: OpId,
    action: Action,
}

/// Live task table.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tasks: BTreeMap<TaskId, RegisteredTask>,
    next_id: u64,
}

impl CancellationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and return its id and the context it must run with.
    pub fn register(&mut self, parent: &Context, op: OpId, action: Action) -> (TaskId, Context) {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        let source = CancellationSource::child_of(parent);
        let ctx = source.context();
        self.tasks.insert(id, RegisteredTask { source, op, action });
        tracing::trace!(
            target: "opmgr.registry",
            task_id = id.0,
            op_id = op.raw(),
            action = action.as_str(),
            "task registered"
        );
        (id, ctx)
    }

    /// Remove a task without cancelling it. Returns `false` if it was already
    /// gone.
    pub fn deregister(&mut self, id: TaskId) -> bool {
        self.tasks.remove(&id).is_some()
    }

    /// Trigger the task's cancellation, then deregister it.
    ///
    /// Returns `false` (and does nothing) if the task already finished or was
    /// cancelled before.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let Some(task) = self.tasks.remove(&id) else {
            return false;
        };
        task.source.cancel();
        tracing::debug!(
            target: "opmgr.registry",
            task_id = id.0,
            op_id = task.op.raw(),
            action = task.action.as_str(),
            "task cancelled"
        );
        true
    }

    /// Cancel every task registered at the time of the call.
    ///
    /// The live set is swapped out before any trigger fires, so the sweep
    /// only ever touches that snapshot. Returns how many tasks were
    /// cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let snapshot = std::mem::take(&mut self.tasks);
        let count = snapshot.len();
        for task in snapshot.into_values() {
            task.source.cancel();
        }
        if count > 0 {
            tracing::debug!(target: "opmgr.registry", count, "cancelled all tasks");
        }
        count
    }

    #[must_use]
    pub fn is_registered(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Ids of live tasks, oldest first.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(n: u64) -> OpId {
        OpId::new(n)
    }

    #[test]
    fn register_assigns_unique_ids() {
        let mut reg = CancellationRegistry::new();
        let parent = Context::background();
        let (a, _) = reg.register(&parent, op(1), Action::Execute);
        let (b, _) = reg.register(&parent, op(2), Action::Undo);
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.task_ids(), vec![a, b]);
    }

    #[test]
    fn cancel_triggers_and_deregisters() {
        let mut reg = CancellationRegistry::new();
        let (id, ctx) = reg.register(&Context::background(), op(1), Action::Execute);

        assert!(reg.cancel(id));
        assert!(ctx.is_cancelled());
        assert!(!reg.is_registered(id));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut reg = CancellationRegistry::new();
        let (id, _) = reg.register(&Context::background(), op(1), Action::Redo);
        assert!(reg.cancel(id));
        assert!(!reg.cancel(id));
        assert!(!reg.deregister(id));
    }

    #[test]
    fn deregister_does_not_cancel() {
        let mut reg = CancellationRegistry::new();
        let (id, ctx) = reg.register(&Context::background(), op(1), Action::Execute);
        assert!(reg.deregister(id));
        assert!(!ctx.is_cancelled());
        assert!(!reg.cancel(id));
    }

    #[test]
    fn cancel_all_sweeps_snapshot_only() {
        let mut reg = CancellationRegistry::new();
        let parent = Context::background();
        let (_, c1) = reg.register(&parent, op(1), Action::Execute);
        let (_, c2) = reg.register(&parent, op(2), Action::Execute);

        assert_eq!(reg.cancel_all(), 2);
        assert!(c1.is_cancelled() && c2.is_cancelled());
        assert!(reg.is_empty());

        let (late, c3) = reg.register(&parent, op(3), Action::Execute);
        assert!(!c3.is_cancelled());
        assert!(reg.is_registered(late));
        assert_eq!(reg.cancel_all(), 1);
    }

    #[test]
    fn ids_not_reused_after_deregister() {
        let mut reg = CancellationRegistry::new();
        let parent = Context::background();
        let (a, _) = reg.register(&parent, op(1), Action::Execute);
        reg.deregister(a);
        let (b, _) = reg.register(&parent, op(1), Action::Execute);
        assert!(b > a);
    }

    #[test]
    fn cancelled_parent_yields_cancelled_task() {
        let mut reg = CancellationRegistry::new();
        let parent = CancellationSource::new();
        parent.cancel();
        let (_, ctx) = reg.register(&parent.context(), op(1), Action::Execute);
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn action_labels() {
        assert_eq!(Action::Execute.to_string(), "execute");
        assert_eq!(Action::Undo.as_str(), "undo");
        assert_eq!(Action::Redo.as_str(), "redo");
    }
}
