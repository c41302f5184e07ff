//! Public handle on a promise node.

use crate::node::PromiseNode;
use crate::settlement::{Outcome, Payload};
use pledge_core::{
    Capabilities, LogicalTime, Origin, PrerequisitePolicy, PromiseId, PromiseResult,
    RejectPolicy, SettlementState,
};
use std::sync::Arc;

/// Shared handle on a node of the promise graph
///
/// Handles are cheap to clone. The node lives as long as any handle, any
/// pending dependent, or any resolver of its executor.
pub struct Promise<T: Payload, E: Payload> {
    node: Arc<PromiseNode<T, E>>,
}

impl<T: Payload, E: Payload> Promise<T, E> {
    pub(crate) fn from_node(node: Arc<PromiseNode<T, E>>) -> Self {
        Self { node }
    }

    pub(crate) fn node(&self) -> &Arc<PromiseNode<T, E>> {
        &self.node
    }

    /// Get the promise ID
    #[must_use]
    pub fn id(&self) -> PromiseId {
        self.node.id()
    }

    /// Current settlement state
    #[must_use]
    pub fn state(&self) -> SettlementState {
        self.node.state()
    }

    /// Whether the promise left the pending state
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.state().is_settled()
    }

    /// Clone of the settled value or error
    ///
    /// `None` while pending, after cancellation, and after the payload was
    /// moved to a dependent. Reading a rejection marks it observed.
    #[must_use]
    pub fn value_if_settled(&self) -> Option<Result<T, E>> {
        self.node.value().ok().flatten()
    }

    /// Clone of the settled value or error, distinguishing a moved payload
    ///
    /// # Errors
    ///
    /// `ValueConsumed` if a by-move dependent took the payload.
    pub fn value(&self) -> PromiseResult<Option<Result<T, E>>> {
        self.node.value()
    }

    /// Final outcome, or `None` while pending or after a move
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome<T, E>> {
        match self.state() {
            SettlementState::Pending => None,
            SettlementState::Cancelled => Some(Outcome::Cancelled),
            SettlementState::Resolved | SettlementState::Rejected => {
                self.value_if_settled().map(Outcome::from)
            }
        }
    }

    /// Resolve the promise
    ///
    /// # Errors
    ///
    /// `AlreadySettled` if the promise is not pending, `CapabilityViolation`
    /// if its executor cannot resolve.
    pub fn resolve(&self, value: T) -> PromiseResult<()> {
        self.node.settle(Outcome::Resolved(value), true)
    }

    /// Reject the promise
    ///
    /// # Errors
    ///
    /// `AlreadySettled` if the promise is not pending, `CapabilityViolation`
    /// if its executor cannot reject.
    pub fn reject(&self, error: E) -> PromiseResult<()> {
        self.node.settle(Outcome::Rejected(error), true)
    }

    /// Cancel the promise and, transitively, its pending dependents
    ///
    /// # Errors
    ///
    /// `AlreadySettled` if the promise is not pending.
    pub fn cancel(&self) -> PromiseResult<()> {
        self.node.settle(Outcome::Cancelled, false)
    }

    /// Settlement kinds the promise may reach
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.node.capabilities()
    }

    /// Prerequisite policy of the promise's executor
    #[must_use]
    pub fn policy(&self) -> PrerequisitePolicy {
        self.node.descriptor().policy
    }

    /// Reject policy given at construction
    #[must_use]
    pub fn reject_policy(&self) -> RejectPolicy {
        self.node.reject_policy()
    }

    /// Mark the rejection as handled so dropping the promise reports nothing
    pub fn ignore_rejection(&self) {
        self.node.mark_observed();
    }

    /// Where the promise was created
    #[must_use]
    pub fn origin(&self) -> Origin {
        self.node.origin()
    }

    /// Label given at construction
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.node.label()
    }

    /// Live dependents of this promise
    #[must_use]
    pub fn dependent_count(&self) -> usize {
        self.node.dependent_count()
    }

    /// Logical time of the settlement
    #[must_use]
    pub fn settled_at(&self) -> Option<LogicalTime> {
        self.node.settled_at()
    }

    /// Whether two handles refer to the same node
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl<T: Payload, E: Payload> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<T: Payload, E: Payload> std::fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("label", &self.label())
            .finish()
    }
}
