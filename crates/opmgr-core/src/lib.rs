#![forbid(unsafe_code)]

//! opmgr core types.
//!
//! This crate holds the pieces every operation author touches and that the
//! runtime consumes without caring about their contents:
//!
//! - [`Command`] / [`CommandKind`] / [`CommandRegistry`] - static descriptors
//!   of what an operation is, for menus and history listings
//! - [`Operation`] - the execute/undo/redo capability, plus [`FnOperation`]
//!   for closure-built operations
//! - [`Context`] / [`CancellationSource`] - cooperative cancellation and
//!   caller-supplied deadlines
//!
//! The engine that runs operations, keeps their history and drains them on
//! shutdown lives in `opmgr-runtime`.

pub mod command;
pub mod context;
pub mod operation;

pub use command::{Command, CommandKind, CommandRegistry};
pub use context::{CancellationSource, Context};
pub use operation::{FnOperation, OpId, OpResult, Operation, OperationError, Outcome};
