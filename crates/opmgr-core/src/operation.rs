#![forbid(unsafe_code)]

//! The operation contract.
//!
//! An [`Operation`] binds a [`Command`] to concrete arguments and the three
//! actions the manager can run: execute, undo and redo. The manager shares an
//! operation between its history and whichever thread runs the current
//! action, so actions take `&self`; operations that keep undo data use
//! interior mutability.
//!
//! # Invariants
//!
//! - `execute` followed by `undo` restores the prior state
//! - `undo` followed by `redo` restores the executed state
//! - Actions observe their [`Context`] and return promptly once cancelled
//!
//! [`FnOperation`] builds an operation from closures, which is usually all a
//! caller needs.

use std::any::Any;
use std::fmt;

use crate::command::Command;
use crate::context::Context;

/// Opaque handle the manager assigns to an operation it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u64);

impl OpId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Success payload of an action.
///
/// Most actions produce nothing ([`Outcome::none`]); those that do box an
/// arbitrary value and callers downcast it back.
#[derive(Default)]
pub struct Outcome(Option<Box<dyn Any + Send>>);

impl Outcome {
    /// An empty outcome.
    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }

    /// Wrap a value.
    #[must_use]
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Borrow the payload as `T`, if it is one.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|v| v.downcast_ref::<T>())
    }

    /// Take the payload as `T`. On a type mismatch the outcome is returned
    /// unchanged.
    pub fn take<T: Any>(self) -> Result<T, Self> {
        match self.0 {
            Some(boxed) => boxed.downcast::<T>().map(|v| *v).map_err(|b| Self(Some(b))),
            None => Err(Self(None)),
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(_) => f.write_str("Outcome(<value>)"),
            None => f.write_str("Outcome(none)"),
        }
    }
}

/// Errors an action can report.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// The action observed a cancelled context.
    #[error("operation cancelled")]
    Cancelled,
    /// The action observed an expired deadline.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,
    /// The action failed with a message.
    #[error("{0}")]
    Failed(String),
    /// The action panicked; the payload message is kept.
    #[error("operation panicked: {0}")]
    Panicked(String),
    /// Any other error raised by the action.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl OperationError {
    /// Shorthand for [`OperationError::Failed`].
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// True for `Cancelled` and `DeadlineExceeded`.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Result of running one action.
pub type OpResult = Result<Outcome, OperationError>;

/// A runnable, reversible unit of work.
pub trait Operation: Send + Sync {
    /// The command this operation is an instance of.
    fn cmd(&self) -> &Command;

    /// Apply the operation.
    fn execute(&self, ctx: &Context) -> OpResult;

    /// Revert the operation.
    fn undo(&self, ctx: &Context) -> OpResult;

    /// Re-apply after an undo. Defaults to [`execute`](Self::execute).
    fn redo(&self, ctx: &Context) -> OpResult {
        self.execute(ctx)
    }

    /// Name used in debug output.
    fn debug_name(&self) -> &'static str {
        "Operation"
    }
}

impl fmt::Debug for dyn Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.debug_name())
            .field("cmd", &self.cmd().name())
            .field("kind", &self.cmd().kind())
            .finish()
    }
}

type ActionFn = Box<dyn Fn(&Context) -> OpResult + Send + Sync>;

/// An [`Operation`] assembled from closures.
///
/// Missing actions fail with [`OperationError::Failed`]; a missing redo falls
/// back to the execute closure.
///
/// ```
/// use opmgr_core::{Command, CommandKind, Context, FnOperation, Operation, Outcome};
///
/// let op = FnOperation::new(Command::new(CommandKind::new(1), "Noop"))
///     .with_execute(|_| Ok(Outcome::new(1_u32)))
///     .with_undo(|_| Ok(Outcome::none()));
///
/// let out = op.execute(&Context::background()).unwrap();
/// assert_eq!(out.downcast_ref::<u32>(), Some(&1));
/// ```
pub struct FnOperation {
    cmd: Command,
    execute: Option<ActionFn>,
    undo: Option<ActionFn>,
    redo: Option<ActionFn>,
}

impl FnOperation {
    #[must_use]
    pub fn new(cmd: Command) -> Self {
        Self {
            cmd,
            execute: None,
            undo: None,
            redo: None,
        }
    }

    #[must_use]
    pub fn with_execute<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> OpResult + Send + Sync + 'static,
    {
        self.execute = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_undo<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> OpResult + Send + Sync + 'static,
    {
        self.undo = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_redo<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> OpResult + Send + Sync + 'static,
    {
        self.redo = Some(Box::new(f));
        self
    }

    fn missing(&self, action: &str) -> OperationError {
        OperationError::Failed(format!("{} has no {action} action", self.cmd.name()))
    }
}

impl Operation for FnOperation {
    fn cmd(&self) -> &Command {
        &self.cmd
    }

    fn execute(&self, ctx: &Context) -> OpResult {
        match &self.execute {
            Some(f) => f(ctx),
            None => Err(self.missing("execute")),
        }
    }

    fn undo(&self, ctx: &Context) -> OpResult {
        match &self.undo {
            Some(f) => f(ctx),
            None => Err(self.missing("undo")),
        }
    }

    fn redo(&self, ctx: &Context) -> OpResult {
        match &self.redo {
            Some(f) => f(ctx),
            None => self.execute(ctx),
        }
    }

    fn debug_name(&self) -> &'static str {
        "FnOperation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use crate::context::CancellationSource;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn add_op(target: Arc<AtomicI64>, amount: i64) -> FnOperation {
        let (t1, t2) = (target.clone(), target);
        FnOperation::new(Command::new(CommandKind::new(1), "Add"))
            .with_execute(move |ctx| {
                ctx.check()?;
                t1.fetch_add(amount, Ordering::SeqCst);
                Ok(Outcome::none())
            })
            .with_undo(move |_| {
                t2.fetch_sub(amount, Ordering::SeqCst);
                Ok(Outcome::none())
            })
    }

    #[test]
    fn execute_undo_redo_cycle() {
        let value = Arc::new(AtomicI64::new(0));
        let op = add_op(value.clone(), 5);
        let ctx = Context::background();

        op.execute(&ctx).unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 5);
        op.undo(&ctx).unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 0);
        // No explicit redo: falls back to execute.
        op.redo(&ctx).unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn cancelled_context_short_circuits() {
        let value = Arc::new(AtomicI64::new(0));
        let op = add_op(value.clone(), 5);
        let source = CancellationSource::new();
        source.cancel();

        let err = op.execute(&source.context()).unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(value.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_undo_fails() {
        let op = FnOperation::new(Command::new(CommandKind::new(3), "Open"))
            .with_execute(|_| Ok(Outcome::none()));
        let err = op.undo(&Context::background()).unwrap_err();
        assert_eq!(err.to_string(), "Open has no undo action");
    }

    #[test]
    fn outcome_take_roundtrip_and_mismatch() {
        let out = Outcome::new(String::from("done"));
        assert_eq!(out.downcast_ref::<String>().map(String::as_str), Some("done"));
        let out = out.take::<u8>().unwrap_err();
        assert_eq!(out.take::<String>().unwrap(), "done");
        assert!(Outcome::none().take::<u8>().is_err());
    }

    #[test]
    fn debug_impl_names_command() {
        let op: Box<dyn Operation> = Box::new(FnOperation::new(Command::new(
            CommandKind::new(2),
            "Rename",
        )));
        let dbg = format!("{op:?}");
        assert!(dbg.contains("FnOperation"));
        assert!(dbg.contains("Rename"));
    }

    #[test]
    fn other_error_is_transparent() {
        let io = std::io::Error::other("disk full");
        let err = OperationError::from(Box::new(io) as Box<dyn std::error::Error + Send + Sync>);
        assert_eq!(err.to_string(), "disk full");
        assert!(!err.is_cancellation());
    }
}
