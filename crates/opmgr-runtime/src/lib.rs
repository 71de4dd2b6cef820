#![forbid(unsafe_code)]

//! opmgr runtime.
//!
//! This crate runs [`Operation`](opmgr_core::Operation)s concurrently and
//! keeps their undo/redo history.
//!
//! # Key Components
//!
//! - [`OpManager`] - launches execute/undo/redo tasks, records successes,
//!   cancels and drains
//! - [`Ledger`] - the undoable/redoable id lists
//! - [`CancellationRegistry`] - live tasks and their cancel triggers
//! - [`WorkTracker`] - outstanding-work counter behind `wait_all`/`shutdown`
//! - [`ManagerConfig`] - storage cap and task thread settings
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use opmgr_core::{Context, FnOperation, Outcome};
//! use opmgr_runtime::{ManagerConfig, OpManager};
//!
//! let mgr = OpManager::new(ManagerConfig::with_storage_limit(100));
//! let paste = mgr.register_command("Paste", "Insert clipboard", "Ctrl+V");
//! let op = Arc::new(
//!     FnOperation::new(paste)
//!         .with_execute(|_| Ok(Outcome::none()))
//!         .with_undo(|_| Ok(Outcome::none())),
//! );
//!
//! let ctx = Context::background();
//! mgr.execute(&ctx, op, |result| assert!(result.is_ok())).unwrap();
//! mgr.wait_all();
//! assert_eq!(mgr.peek_undo_command().unwrap().name(), "Paste");
//!
//! mgr.undo_last(&ctx, |_| {}).unwrap();
//! mgr.shutdown(false);
//! assert!(mgr.can_redo());
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod registry;
pub mod stats;

pub use config::{ConfigError, ManagerConfig, UNLIMITED_STORAGE};
pub use engine::{CancelHandle, OpManager};
pub use error::ManagerError;
pub use ledger::Ledger;
pub use lifecycle::WorkTracker;
pub use registry::{Action, CancellationRegistry, TaskId};
pub use stats::ManagerStats;
