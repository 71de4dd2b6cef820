#![forbid(unsafe_code)]

//! The operation manager.
//!
//! [`OpManager`] runs operations on their own threads, keeps the undo/redo
//! [`Ledger`] in step with successful completions, lets callers cancel any
//! in-flight task, and drains outstanding work on shutdown.
//!
//! # Task flow
//!
//! ```text
//! execute(ctx, op, cb)
//!   │  (calling thread, under the state lock)
//!   ├─ reserve storage slot, assign OpId, mark busy
//!   ├─ register task context derived from ctx
//!   ├─ outstanding += 1
//!   └─ spawn ───────────────► task thread
//!   ◄─ CancelHandle               ├─ op.execute(task ctx)
//!                                 ├─ Ok → ledger.record_done
//!                                 ├─ settle: clear busy, release reservation
//!                                 ├─ cb(result)            (exactly once)
//!                                 └─ TaskGuard::drop       (every exit path)
//!                                      deregister, outstanding -= 1
//! ```
//!
//! The handle is valid before the task thread starts: registration happens
//! on the calling thread. Once a callback has been invoked the operation is
//! free again, so the next execute/undo/redo on it can be issued from the
//! callback itself or from any thread it signals.
//!
//! # Locking
//!
//! Ledger, payload table, busy set, registry and id counters share one
//! `RwLock`. Queries take the read side. The outstanding-work counter has
//! its own mutex so `wait_all` can block on a condition variable; it is only
//! ever taken after the state lock, never before. No lock is held while an
//! action or a completion callback runs.
//!
//! A completion callback may call back into the manager, except for
//! [`OpManager::wait_all`] and [`OpManager::shutdown`], which would wait on
//! the very task running the callback.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::thread;

use opmgr_core::{
    Command, CommandRegistry, Context, OpId, OpResult, Operation, OperationError, Outcome,
};
use web_time::{Duration, Instant};

use crate::config::{ManagerConfig, UNLIMITED_STORAGE};
use crate::error::ManagerError;
use crate::ledger::Ledger;
use crate::lifecycle::WorkTracker;
use crate::registry::{Action, CancellationRegistry, TaskId};
use crate::stats::{ManagerStats, StatsCounters};

// ============================================================================
// Shared state
// ============================================================================

struct ManagerState {
    ledger: Ledger,
    /// Payloads for every id in the ledger or with a task in flight.
    ops: HashMap<OpId, Arc<dyn Operation>>,
    /// Ids with a task (or synchronous execute) in flight.
    busy: HashSet<OpId>,
    /// Storage slots held by executes that have not finished yet.
    reserved: usize,
    registry: CancellationRegistry,
    commands: CommandRegistry,
    next_op: u64,
}

impl ManagerState {
    fn new() -> Self {
        Self {
            ledger: Ledger::new(),
            ops: HashMap::new(),
            busy: HashSet::new(),
            reserved: 0,
            registry: CancellationRegistry::new(),
            commands: CommandRegistry::new(),
            next_op: 0,
        }
    }

    fn stored(&self) -> usize {
        self.ledger.len() + self.reserved
    }

    /// Admit a new operation: check the cap, assign an id, hold a slot.
    fn reserve(&mut self, limit: usize, op: Arc<dyn Operation>) -> Result<OpId, ManagerError> {
        if limit != UNLIMITED_STORAGE && self.stored() >= limit {
            return Err(ManagerError::StorageLimitExceeded { limit });
        }
        self.next_op += 1;
        let id = OpId::new(self.next_op);
        self.ops.insert(id, op);
        self.busy.insert(id);
        self.reserved += 1;
        Ok(id)
    }

    /// Mark a held operation busy for an undo or redo.
    fn claim(&mut self, id: OpId) -> Result<Arc<dyn Operation>, ManagerError> {
        let op = self
            .ops
            .get(&id)
            .cloned()
            .ok_or(ManagerError::UnknownOperation(id))?;
        if !self.busy.insert(id) {
            return Err(ManagerError::OperationBusy(id));
        }
        Ok(op)
    }
}

struct Shared {
    state: RwLock<ManagerState>,
    work: WorkTracker,
    config: ManagerConfig,
    stats: StatsCounters,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, ManagerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ManagerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Task guard
// ============================================================================

/// Releases everything a launch acquired, on every exit path.
///
/// The operation itself is settled (busy mark, reservation, payload) before
/// the completion callback runs, so the callback and anyone it wakes can
/// launch the next action on it. Deregistration and the outstanding-work
/// counter follow the callback.
struct TaskGuard {
    shared: Arc<Shared>,
    op: OpId,
    action: Action,
    /// `None` for synchronous execution, which skips the registry and the
    /// outstanding-work counter.
    task: Option<TaskId>,
    holds_reservation: bool,
    settled: bool,
    finished: Option<Arc<AtomicBool>>,
}

impl TaskGuard {
    fn record_success(&mut self) {
        let mut state = self.shared.write();
        match self.action {
            Action::Execute => {
                state.ledger.record_done(self.op);
                if self.holds_reservation {
                    state.reserved = state.reserved.saturating_sub(1);
                    self.holds_reservation = false;
                }
            }
            // History was cleared while the task ran; the entry holds no
            // slot any more and is not brought back.
            _ if !state.ledger.contains(self.op) => {
                tracing::debug!(
                    target: "opmgr.engine",
                    op_id = self.op.raw(),
                    action = self.action.as_str(),
                    "operation left history while running; not recorded"
                );
            }
            Action::Undo => state.ledger.record_undone(self.op),
            Action::Redo => state.ledger.record_redone(self.op),
        }
    }

    /// Clear the busy mark, drop an unused reservation and forget the
    /// payload if the operation is not in history.
    fn settle(&mut self) {
        if std::mem::replace(&mut self.settled, true) {
            return;
        }
        let mut state = self.shared.write();
        state.busy.remove(&self.op);
        if std::mem::replace(&mut self.holds_reservation, false) {
            state.reserved = state.reserved.saturating_sub(1);
        }
        if !state.ledger.contains(self.op) {
            state.ops.remove(&self.op);
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.settle();
        if let Some(task) = self.task {
            self.shared.write().registry.deregister(task);
        }
        if let Some(finished) = &self.finished {
            finished.store(true, Ordering::Release);
        }
        if self.task.is_some() {
            self.shared.work.finish();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic payload>".to_string())
}

fn run_action(op: &dyn Operation, action: Action, ctx: &Context) -> OpResult {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match action {
        Action::Execute => op.execute(ctx),
        Action::Undo => op.undo(ctx),
        Action::Redo => op.redo(ctx),
    }));
    outcome.unwrap_or_else(|payload| {
        let msg = panic_message(&*payload);
        tracing::error!(
            target: "opmgr.engine",
            action = action.as_str(),
            command = %op.cmd().name(),
            panic_msg = %msg,
            "operation panicked"
        );
        Err(OperationError::Panicked(msg))
    })
}

fn run_task<F>(mut guard: TaskGuard, op: Arc<dyn Operation>, ctx: Context, on_complete: F)
where
    F: FnOnce(OpResult),
{
    let span = tracing::debug_span!(
        "opmgr.task",
        task_id = guard.task.map_or(0, TaskId::raw),
        op_id = guard.op.raw(),
        action = guard.action.as_str(),
        command = %op.cmd().name(),
        duration_us = tracing::field::Empty,
        result = tracing::field::Empty,
    )
    .entered();

    tracing::debug!(target: "opmgr.engine", "task started");
    let start = Instant::now();
    let result = run_action(op.as_ref(), guard.action, &ctx);
    let duration_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
    span.record("duration_us", duration_us);

    match &result {
        Ok(_) => {
            guard.record_success();
            span.record("result", "ok");
            tracing::debug!(target: "opmgr.engine", duration_us, "task completed");
        }
        Err(err) if err.is_cancellation() => {
            span.record("result", "cancelled");
            tracing::debug!(target: "opmgr.engine", error = %err, "task cancelled");
        }
        Err(err) => {
            span.record("result", "error");
            tracing::warn!(
                target: "opmgr.engine",
                action = guard.action.as_str(),
                command = %op.cmd().name(),
                error = %err,
                "operation failed"
            );
        }
    }
    guard.shared.stats.completed(result.as_ref().err());
    guard.settle();

    on_complete(result);
    drop(guard);
}

// ============================================================================
// Cancel handle
// ============================================================================

/// Caller-side handle to one launched task.
///
/// Valid from the moment the launch returns. Cancelling a task that already
/// finished, or cancelling twice, does nothing.
#[derive(Clone)]
pub struct CancelHandle {
    task: TaskId,
    op: OpId,
    manager: Weak<Shared>,
    finished: Arc<AtomicBool>,
}

impl CancelHandle {
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// The operation the task runs; pass it to [`OpManager::undo`] or
    /// [`OpManager::redo`] later.
    #[must_use]
    pub fn op(&self) -> OpId {
        self.op
    }

    /// Request cancellation. Returns `true` if a live task was signalled.
    pub fn cancel(&self) -> bool {
        self.manager
            .upgrade()
            .is_some_and(|shared| shared.write().registry.cancel(self.task))
    }

    /// Whether the task's cancel trigger is still live.
    ///
    /// Turns `false` as soon as the task is cancelled, even while its action
    /// is still winding down. Use [`is_finished`](Self::is_finished) to learn
    /// whether the task is done.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.manager
            .upgrade()
            .is_some_and(|shared| shared.read().registry.is_registered(self.task))
    }

    /// Whether the task has run its callback and released everything it
    /// held.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("task", &self.task)
            .field("op", &self.op)
            .field("finished", &self.is_finished())
            .finish()
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Concurrent execute/undo/redo engine.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct OpManager {
    shared: Arc<Shared>,
}

impl Default for OpManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl fmt::Debug for OpManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.read();
        f.debug_struct("OpManager")
            .field("undo_depth", &state.ledger.undo_depth())
            .field("redo_depth", &state.ledger.redo_depth())
            .field("reserved", &state.reserved)
            .field("in_flight", &state.registry.len())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl OpManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(ManagerState::new()),
                work: WorkTracker::new(),
                config,
                stats: StatsCounters::default(),
            }),
        }
    }

    /// Create a manager from zero or one configuration; defaults apply when
    /// none is given.
    ///
    /// # Errors
    ///
    /// [`ManagerError::TooManyConfigs`] if more than one is supplied.
    pub fn with_configs<I>(configs: I) -> Result<Self, ManagerError>
    where
        I: IntoIterator<Item = ManagerConfig>,
    {
        let mut configs = configs.into_iter();
        let config = configs.next().unwrap_or_default();
        if configs.next().is_some() {
            return Err(ManagerError::TooManyConfigs);
        }
        Ok(Self::new(config))
    }

    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    // ========================================================================
    // Launching
    // ========================================================================

    /// Execute `op` on a new task.
    ///
    /// On success the operation becomes the newest undoable entry. The
    /// returned handle carries the [`OpId`] used for later undo/redo.
    ///
    /// # Errors
    ///
    /// [`ManagerError::StorageLimitExceeded`] when the history is full (the
    /// action does not run), [`ManagerError::Spawn`] if no thread could be
    /// started. `on_complete` is not called in either case.
    pub fn execute<F>(
        &self,
        ctx: &Context,
        op: Arc<dyn Operation>,
        on_complete: F,
    ) -> Result<CancelHandle, ManagerError>
    where
        F: FnOnce(OpResult) + Send + 'static,
    {
        let limit = self.shared.config.storage_limit;
        self.launch(ctx, Action::Execute, on_complete, |state| {
            let id = state.reserve(limit, Arc::clone(&op))?;
            Ok((id, op))
        })
    }

    /// Undo a held operation on a new task.
    ///
    /// # Errors
    ///
    /// [`ManagerError::UnknownOperation`], [`ManagerError::OperationBusy`] or
    /// [`ManagerError::Spawn`].
    pub fn undo<F>(
        &self,
        ctx: &Context,
        op: OpId,
        on_complete: F,
    ) -> Result<CancelHandle, ManagerError>
    where
        F: FnOnce(OpResult) + Send + 'static,
    {
        self.launch(ctx, Action::Undo, on_complete, |state| {
            state.claim(op).map(|payload| (op, payload))
        })
    }

    /// Redo a held operation on a new task.
    ///
    /// # Errors
    ///
    /// Same as [`undo`](Self::undo).
    pub fn redo<F>(
        &self,
        ctx: &Context,
        op: OpId,
        on_complete: F,
    ) -> Result<CancelHandle, ManagerError>
    where
        F: FnOnce(OpResult) + Send + 'static,
    {
        self.launch(ctx, Action::Redo, on_complete, |state| {
            state.claim(op).map(|payload| (op, payload))
        })
    }

    /// Undo the newest undoable operation.
    ///
    /// # Errors
    ///
    /// [`ManagerError::NothingToUndo`] on an empty undo list,
    /// [`ManagerError::OperationBusy`] if the newest entry is still running.
    pub fn undo_last<F>(&self, ctx: &Context, on_complete: F) -> Result<CancelHandle, ManagerError>
    where
        F: FnOnce(OpResult) + Send + 'static,
    {
        self.launch(ctx, Action::Undo, on_complete, |state| {
            let op = state.ledger.peek_undo().ok_or(ManagerError::NothingToUndo)?;
            state.claim(op).map(|payload| (op, payload))
        })
    }

    /// Redo the newest redoable operation.
    ///
    /// # Errors
    ///
    /// [`ManagerError::NothingToRedo`] on an empty redo list,
    /// [`ManagerError::OperationBusy`] if the newest entry is still running.
    pub fn redo_last<F>(&self, ctx: &Context, on_complete: F) -> Result<CancelHandle, ManagerError>
    where
        F: FnOnce(OpResult) + Send + 'static,
    {
        self.launch(ctx, Action::Redo, on_complete, |state| {
            let op = state.ledger.peek_redo().ok_or(ManagerError::NothingToRedo)?;
            state.claim(op).map(|payload| (op, payload))
        })
    }

    fn launch<F, S>(
        &self,
        ctx: &Context,
        action: Action,
        on_complete: F,
        select: S,
    ) -> Result<CancelHandle, ManagerError>
    where
        F: FnOnce(OpResult) + Send + 'static,
        S: FnOnce(&mut ManagerState) -> Result<(OpId, Arc<dyn Operation>), ManagerError>,
    {
        let shared = &self.shared;
        let (id, op, task, task_ctx) = {
            let mut state = shared.write();
            let (id, op) = select(&mut *state).inspect_err(|err| {
                shared.stats.rejected();
                tracing::debug!(
                    target: "opmgr.engine",
                    action = action.as_str(),
                    error = %err,
                    "launch rejected"
                );
            })?;
            let (task, task_ctx) = state.registry.register(ctx, id, action);
            shared.work.begin();
            (id, op, task, task_ctx)
        };

        let finished = Arc::new(AtomicBool::new(false));
        let guard = TaskGuard {
            shared: Arc::clone(shared),
            op: id,
            action,
            task: Some(task),
            holds_reservation: action == Action::Execute,
            settled: false,
            finished: Some(Arc::clone(&finished)),
        };

        let mut builder = thread::Builder::new().name(format!(
            "{}-{}",
            shared.config.thread_name_prefix,
            task.raw()
        ));
        if let Some(size) = shared.config.thread_stack_size {
            builder = builder.stack_size(size);
        }
        // Task spans go to the launching thread's subscriber.
        let dispatch = tracing::dispatcher::get_default(Clone::clone);
        // On failure the closure, and with it the guard, is dropped here,
        // which undoes the registration above.
        builder
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    run_task(guard, op, task_ctx, on_complete);
                });
            })
            .map_err(|err| {
                shared.stats.rejected();
                tracing::error!(
                    target: "opmgr.engine",
                    task_id = task.raw(),
                    error = %err,
                    "failed to spawn task thread"
                );
                ManagerError::Spawn(err)
            })?;
        shared.stats.launched();

        Ok(CancelHandle {
            task,
            op: id,
            manager: Arc::downgrade(shared),
            finished,
        })
    }

    /// Execute `op` on the calling thread and record it on success.
    ///
    /// Runs with `ctx` directly; the task is not registered and does not
    /// count as outstanding work.
    ///
    /// # Errors
    ///
    /// [`ManagerError::StorageLimitExceeded`] when the history is full, or
    /// [`ManagerError::Operation`] with the action's own error.
    pub fn execute_sync(
        &self,
        ctx: &Context,
        op: Arc<dyn Operation>,
    ) -> Result<(OpId, Outcome), ManagerError> {
        let shared = &self.shared;
        let id = shared
            .write()
            .reserve(shared.config.storage_limit, Arc::clone(&op))
            .inspect_err(|_| shared.stats.rejected())?;

        let mut guard = TaskGuard {
            shared: Arc::clone(shared),
            op: id,
            action: Action::Execute,
            task: None,
            holds_reservation: true,
            settled: false,
            finished: None,
        };
        let result = run_action(op.as_ref(), Action::Execute, ctx);
        shared.stats.completed(result.as_ref().err());
        match result {
            Ok(outcome) => {
                guard.record_success();
                Ok((id, outcome))
            }
            Err(err) => Err(err.into()),
        }
    }

    // ========================================================================
    // History queries
    // ========================================================================

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.shared.read().ledger.can_undo()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.shared.read().ledger.can_redo()
    }

    /// Command of the newest undoable operation, `None` if there is none.
    #[must_use]
    pub fn peek_undo_command(&self) -> Option<Command> {
        let state = self.shared.read();
        state
            .ledger
            .peek_undo()
            .and_then(|id| state.ops.get(&id))
            .map(|op| op.cmd().clone())
    }

    /// Command of the newest redoable operation, `None` if there is none.
    #[must_use]
    pub fn peek_redo_command(&self) -> Option<Command> {
        let state = self.shared.read();
        state
            .ledger
            .peek_redo()
            .and_then(|id| state.ops.get(&id))
            .map(|op| op.cmd().clone())
    }

    /// Newest undoable operation id.
    #[must_use]
    pub fn peek_undo(&self) -> Option<OpId> {
        self.shared.read().ledger.peek_undo()
    }

    /// Newest redoable operation id.
    #[must_use]
    pub fn peek_redo(&self) -> Option<OpId> {
        self.shared.read().ledger.peek_redo()
    }

    /// Commands on the undo list, most recent first.
    pub fn undo_commands(&self, limit: usize) -> Vec<Command> {
        let state = self.shared.read();
        state
            .ledger
            .undo_ids(limit)
            .into_iter()
            .filter_map(|id| state.ops.get(&id).map(|op| op.cmd().clone()))
            .collect()
    }

    /// Commands on the redo list, most recent first.
    pub fn redo_commands(&self, limit: usize) -> Vec<Command> {
        let state = self.shared.read();
        state
            .ledger
            .redo_ids(limit)
            .into_iter()
            .filter_map(|id| state.ops.get(&id).map(|op| op.cmd().clone()))
            .collect()
    }

    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.shared.read().ledger.undo_depth()
    }

    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.shared.read().ledger.redo_depth()
    }

    /// History entries plus slots reserved by unfinished executes.
    #[must_use]
    pub fn stored(&self) -> usize {
        self.shared.read().stored()
    }

    /// The payload of a held operation.
    #[must_use]
    pub fn operation(&self, id: OpId) -> Option<Arc<dyn Operation>> {
        self.shared.read().ops.get(&id).cloned()
    }

    /// Copy of the current ledger.
    #[must_use]
    pub fn ledger(&self) -> Ledger {
        self.shared.read().ledger.clone()
    }

    /// Forget all history.
    ///
    /// Operations with a task in flight stay held until the task ends. An
    /// in-flight execute is still recorded if it succeeds, since it holds a
    /// reserved slot; an in-flight undo or redo is not.
    pub fn clear_history(&self) {
        let mut state = self.shared.write();
        state.ledger.clear();
        let ManagerState { ops, busy, .. } = &mut *state;
        ops.retain(|id, _| busy.contains(id));
        tracing::debug!(target: "opmgr.engine", "history cleared");
    }

    /// Allocate a command kind from this manager's own counter.
    pub fn register_command(
        &self,
        name: impl Into<Arc<str>>,
        info: impl Into<Arc<str>>,
        shortcut: impl Into<Arc<str>>,
    ) -> Command {
        self.shared.write().commands.command(name, info, shortcut)
    }

    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        self.shared.stats.snapshot()
    }

    // ========================================================================
    // Cancellation & lifecycle
    // ========================================================================

    /// Cancel one task. Returns `false` if it is no longer registered.
    pub fn cancel(&self, task: TaskId) -> bool {
        self.shared.write().registry.cancel(task)
    }

    /// Cancel every task registered right now. Returns how many were
    /// signalled.
    pub fn cancel_all(&self) -> usize {
        self.shared.write().registry.cancel_all()
    }

    /// Number of registered (live, uncancelled) tasks.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.read().registry.len()
    }

    /// Number of tasks whose completion callback has not returned yet.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.shared.work.outstanding()
    }

    /// Block until every launched task has completed and run its callback.
    pub fn wait_all(&self) {
        self.shared.work.wait_all();
    }

    /// Like [`wait_all`](Self::wait_all) with an upper bound. Returns `true`
    /// if drained.
    pub fn wait_all_timeout(&self, timeout: Duration) -> bool {
        self.shared.work.wait_all_timeout(timeout)
    }

    /// Drain the manager, optionally cancelling in-flight tasks first.
    ///
    /// Returns once every task launched before the call has finished and run
    /// its callback. The manager stays usable afterwards.
    pub fn shutdown(&self, cancel_in_flight: bool) {
        let _span = tracing::debug_span!(
            "opmgr.shutdown",
            cancel_in_flight,
            outstanding = self.outstanding()
        )
        .entered();
        if cancel_in_flight {
            let cancelled = self.cancel_all();
            tracing::debug!(target: "opmgr.lifecycle", cancelled, "cancelled in-flight tasks");
        }
        self.wait_all();
        tracing::debug!(target: "opmgr.lifecycle", "shutdown complete");
    }
}

// ============================================================================
// Tests
// ============================================================================
