//! Engine error types.

use narthex_core::{CoreError, HandlerId, TaskId};
use narthex_remote::RemoteError;

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Entity lookup failure from the model layer
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Delegation failure; aborts the current chain
    #[error("remote call failed: {0}")]
    Remote(#[from] RemoteError),

    /// A program named a handler the engine does not know
    #[error("handler not found: {0}")]
    HandlerNotFound(HandlerId),

    /// No parkable control reachable; fatal for the task
    #[error("no parkable control reachable in task {task}: {reason}")]
    Navigation {
        /// The task whose form cannot park focus
        task: TaskId,
        /// What was attempted
        reason: String,
    },

    /// Nested raise-event chains exceeded the configured depth
    #[error("event chain depth exceeded {limit}")]
    ChainDepthExceeded {
        /// Configured limit
        limit: usize,
    },
}

impl EngineError {
    /// Whether the error is a structural fault: an upstream
    /// construction defect that is logged and skipped rather than
    /// crashing the dispatch loop
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Core(_) | Self::HandlerNotFound(_))
    }
}
