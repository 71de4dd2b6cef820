#![forbid(unsafe_code)]

//! Errors reported by the manager itself.
//!
//! Everything here is returned synchronously to the caller that made the
//! request, except [`ManagerError::Operation`], which only appears on
//! [`execute_sync`](crate::OpManager::execute_sync). Asynchronous launches
//! report operation failures through their completion callback instead.
//!
//! None of these errors leave the manager unusable.

use opmgr_core::{OpId, OperationError};

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// More than one configuration was supplied at construction.
    #[error("only one optional configuration can be passed to the operation manager")]
    TooManyConfigs,

    /// Recording another operation would exceed the storage limit.
    #[error("operation storage limit of {limit} exceeded; increase the undo/redo limit")]
    StorageLimitExceeded { limit: usize },

    /// Nothing to undo.
    #[error("cannot undo: nothing to undo")]
    NothingToUndo,

    /// Nothing to redo.
    #[error("cannot redo: nothing to redo")]
    NothingToRedo,

    /// The manager does not hold this operation.
    #[error("unknown operation {0}")]
    UnknownOperation(OpId),

    /// The operation already has a task in flight.
    #[error("operation {0} is busy with another task")]
    OperationBusy(OpId),

    /// The worker thread could not be started.
    #[error("failed to spawn task thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The operation's own action failed (synchronous execution only).
    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl ManagerError {
    /// True when the error came from the operation rather than the manager.
    #[must_use]
    pub fn is_operation_error(&self) -> bool {
        matches!(self, Self::Operation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(
            ManagerError::StorageLimitExceeded { limit: 2 }.to_string(),
            "operation storage limit of 2 exceeded; increase the undo/redo limit"
        );
        assert_eq!(
            ManagerError::UnknownOperation(OpId::new(4)).to_string(),
            "unknown operation op#4"
        );
    }

    #[test]
    fn operation_error_is_transparent() {
        let err = ManagerError::from(OperationError::failed("boom"));
        assert_eq!(err.to_string(), "boom");
        assert!(err.is_operation_error());
        assert!(!ManagerError::NothingToUndo.is_operation_error());
    }
}
