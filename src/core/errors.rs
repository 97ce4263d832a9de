/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 *
 * Timeouts are deliberately absent: a wait that runs out of time reports
 * `false`, `None` or `Ok(None)` so callers can tell "nothing ready yet"
 * apart from a genuine fault.
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used by every fallible primitive operation
pub type SyncResult<T> = Result<T, SyncError>;

/// Synchronization errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SyncError {
    #[error("Thread was interrupted while waiting")]
    #[diagnostic(
        code(sync::interrupted),
        help("The interrupt flag has been cleared. Retry the call or propagate the cancellation.")
    )]
    Interrupted,

    #[error("Illegal argument: {0}")]
    #[diagnostic(
        code(sync::illegal_argument),
        help("Check capacities, permit counts and party counts passed at construction.")
    )]
    IllegalArgument(String),

    #[error("Illegal state: {0}")]
    #[diagnostic(
        code(sync::illegal_state),
        help("The calling thread does not own the resource or the primitive's contract forbids this use.")
    )]
    IllegalState(String),

    #[error("Barrier is broken")]
    #[diagnostic(
        code(sync::broken_barrier),
        help("A party was interrupted, timed out, or the barrier was reset. Call reset() to start a new generation.")
    )]
    BrokenBarrier,
}

impl SyncError {
    pub(crate) fn illegal_argument(msg: impl Into<String>) -> Self {
        SyncError::IllegalArgument(msg.into())
    }

    pub(crate) fn illegal_state(msg: impl Into<String>) -> Self {
        SyncError::IllegalState(msg.into())
    }

    /// True for the cancellation outcome of an interrupted wait
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SyncError::Interrupted)
    }
}
