//! Core error types for PLEDGE.

use crate::id::PromiseId;
use crate::origin::Origin;
use crate::state::SettlementKind;

/// Core result type
pub type PromiseResult<T> = Result<T, PromiseError>;

/// Contract violations and graph-construction failures reported by the engine
///
/// Executor failures are not errors at this level: they become rejections of
/// the promise that ran the executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromiseError {
    /// The promise already left the pending state
    #[error("{id} is already settled")]
    AlreadySettled {
        /// Promise that was settled twice
        id: PromiseId,
    },

    /// The promise was settled with a kind its executor does not declare
    #[error("{id} cannot be {kind}: its executor does not declare it")]
    CapabilityViolation {
        /// Offending promise
        id: PromiseId,
        /// Settlement kind that was attempted
        kind: SettlementKind,
    },

    /// A rejected promise was destroyed without anyone reading the rejection
    #[error("{id} created at {origin} was rejected and nobody observed it")]
    UnobservedRejection {
        /// Rejected promise
        id: PromiseId,
        /// Where the promise was created
        origin: Origin,
    },

    /// A by-move consumer would share a prerequisite with another dependent
    #[error("{prerequisite} is consumed by move and cannot have another dependent")]
    ExclusiveArgument {
        /// Prerequisite that would be shared
        prerequisite: PromiseId,
    },

    /// The settled value was already handed to a by-move consumer
    #[error("value of {id} was moved to its dependent")]
    ValueConsumed {
        /// Promise whose value is gone
        id: PromiseId,
    },

    /// The requested graph shape is not executable
    #[error("invalid promise graph: {reason}")]
    InvalidGraph {
        /// What is wrong
        reason: String,
    },

    /// Dispatch to an async runtime is not possible
    #[error("runtime unavailable: {reason}")]
    Runtime {
        /// Why dispatch failed
        reason: String,
    },
}

impl PromiseError {
    /// Whether the error is a programmer error in how the graph is driven
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::AlreadySettled { .. }
                | Self::CapabilityViolation { .. }
                | Self::ExclusiveArgument { .. }
                | Self::ValueConsumed { .. }
        )
    }
}
