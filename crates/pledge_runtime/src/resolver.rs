//! Settlement handle given to executors.

use crate::node::PromiseNode;
use crate::promise::Promise;
use crate::settlement::{Outcome, Payload};
use pledge_core::{PromiseId, PromiseResult};
use std::sync::Arc;

/// Settles the promise whose executor is running
///
/// Clones share one settlement right. When the last clone is dropped while
/// the promise is still pending, the promise is cancelled, so an executor
/// that forgets its resolver does not leave dependents waiting forever.
pub struct Resolver<T: Payload, E: Payload> {
    inner: Arc<ResolverInner<T, E>>,
}

struct ResolverInner<T: Payload, E: Payload> {
    node: Arc<PromiseNode<T, E>>,
}

impl<T: Payload, E: Payload> Resolver<T, E> {
    pub(crate) fn new(node: Arc<PromiseNode<T, E>>) -> Self {
        Self {
            inner: Arc::new(ResolverInner { node }),
        }
    }

    /// Id of the promise being settled
    #[must_use]
    pub fn id(&self) -> PromiseId {
        self.inner.node.id()
    }

    /// Whether the promise is still waiting for a settlement
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.inner.node.state().is_settled()
    }

    /// Handle on the promise being settled
    #[must_use]
    pub fn promise(&self) -> Promise<T, E> {
        Promise::from_node(Arc::clone(&self.inner.node))
    }

    /// Resolve the promise
    ///
    /// # Errors
    ///
    /// `AlreadySettled` if another settlement won, `CapabilityViolation` if
    /// the executor does not declare resolution.
    pub fn resolve(&self, value: T) -> PromiseResult<()> {
        self.inner.node.settle(Outcome::Resolved(value), true)
    }

    /// Reject the promise
    ///
    /// # Errors
    ///
    /// `AlreadySettled` if another settlement won, `CapabilityViolation` if
    /// the executor does not declare rejection.
    pub fn reject(&self, error: E) -> PromiseResult<()> {
        self.inner.node.settle(Outcome::Rejected(error), true)
    }

    /// Settle with a result
    ///
    /// # Errors
    ///
    /// Same as [`Resolver::resolve`] and [`Resolver::reject`].
    pub fn settle(&self, result: Result<T, E>) -> PromiseResult<()> {
        self.inner.node.settle(result.into(), true)
    }

    /// Cancel the promise
    ///
    /// # Errors
    ///
    /// `AlreadySettled` if the promise already settled.
    pub fn cancel(&self) -> PromiseResult<()> {
        self.inner.node.settle(Outcome::Cancelled, false)
    }
}

impl<T: Payload, E: Payload> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Payload, E: Payload> std::fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("promise", &self.id())
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl<T: Payload, E: Payload> Drop for ResolverInner<T, E> {
    fn drop(&mut self) {
        if self.node.settle(Outcome::Cancelled, false).is_ok() {
            tracing::debug!(promise = %self.node.id(), "resolver dropped before settling; promise cancelled");
        }
    }
}
