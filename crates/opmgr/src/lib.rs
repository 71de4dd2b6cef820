#![forbid(unsafe_code)]

//! opmgr public facade crate.
//!
//! Re-exports the operation model from `opmgr-core` and the manager from
//! `opmgr-runtime`, plus a prelude for day-to-day usage.

// --- Core re-exports -------------------------------------------------------

pub use opmgr_core::{
    CancellationSource, Command, CommandKind, CommandRegistry, Context, FnOperation, OpId,
    OpResult, Operation, OperationError, Outcome,
};

// --- Runtime re-exports ----------------------------------------------------

pub use opmgr_runtime::{
    Action, CancelHandle, CancellationRegistry, ConfigError, Ledger, ManagerConfig, ManagerError,
    ManagerStats, OpManager, TaskId, UNLIMITED_STORAGE, WorkTracker,
};

/// Standard result type for manager APIs.
pub type Result<T> = std::result::Result<T, ManagerError>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        CancelHandle, CancellationSource, Command, Context, FnOperation, ManagerConfig,
        ManagerError, OpId, OpManager, OpResult, Operation, OperationError, Outcome, Result,
    };

    pub use crate::{core, runtime};
}

pub use opmgr_core as core;
pub use opmgr_runtime as runtime;
