//! Lifecycle errors.

use crate::state::ApplicationState;

/// Lifecycle result type
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Rejected lifecycle requests
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// The transition is not in the table
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: ApplicationState,
        /// Requested state
        to: ApplicationState,
    },

    /// The application already stopped
    #[error("application is stopped; cannot enter {to}")]
    Stopped {
        /// Requested state
        to: ApplicationState,
    },

    /// An operation required a different current state
    #[error("expected application to be {expected}, found {actual}")]
    UnexpectedState {
        /// Required state
        expected: ApplicationState,
        /// Current state
        actual: ApplicationState,
    },

    /// A state name did not parse
    #[error("unknown application state '{name}'")]
    UnknownState {
        /// Name given
        name: String,
    },
}
