//! Executor interface.
//!
//! An executor is the computation bound to a promise node. The engine runs
//! it at most once, after the node's prerequisites satisfy the executor's
//! policy, and releases it immediately afterwards.

use crate::resolver::Resolver;
use crate::settlement::Payload;
use pledge_core::{ArgumentPassing, Capabilities, PrerequisitePolicy};
use std::marker::PhantomData;

/// Inputs handed to an executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arguments<T, E> {
    /// No prerequisites (manual node or empty prerequisite list)
    None,
    /// The prerequisite an AnyOne executor was bound to
    Single {
        /// Position of the prerequisite in the node's list
        index: usize,
        /// Its resolution or rejection
        outcome: Result<T, E>,
    },
    /// Every prerequisite's value, in list order
    All(Vec<T>),
}

impl<T, E> Arguments<T, E> {
    /// Resolved values in prerequisite order
    ///
    /// A single rejected outcome yields no values.
    pub fn into_values(self) -> Vec<T> {
        match self {
            Self::None => Vec::new(),
            Self::Single { outcome, .. } => outcome.into_iter().collect(),
            Self::All(values) => values,
        }
    }

    /// The bound outcome of an AnyOne executor
    pub fn into_outcome(self) -> Option<Result<T, E>> {
        match self {
            Self::Single { outcome, .. } => Some(outcome),
            Self::None | Self::All(_) => None,
        }
    }
}

/// Computation attached to a promise node
///
/// `execute` receives its arguments and a resolver for the node. It may
/// settle the node before returning or hand a clone of the resolver to
/// asynchronous work. Returning `Err` rejects the node with that error.
/// Once every resolver clone is dropped, a node that is still pending is
/// cancelled.
pub trait Executor<T: Payload, E: Payload>: Send {
    /// Which prerequisites must settle before `execute` runs
    fn prerequisite_policy(&self) -> PrerequisitePolicy;

    /// How resolved prerequisite values are handed over
    fn resolve_argument_passing(&self) -> ArgumentPassing {
        ArgumentPassing::ByCopy
    }

    /// How rejected prerequisite errors are handed over
    fn reject_argument_passing(&self) -> ArgumentPassing {
        ArgumentPassing::ByCopy
    }

    /// Whether the executor may resolve its node
    fn can_resolve(&self) -> bool {
        true
    }

    /// Whether the executor may reject its node
    fn can_reject(&self) -> bool {
        true
    }

    /// Run the computation
    ///
    /// # Errors
    ///
    /// An error is an implicit rejection of the node.
    fn execute(
        self: Box<Self>,
        arguments: Arguments<T, E>,
        resolver: &Resolver<T, E>,
    ) -> Result<(), E>;
}

/// Snapshot of an executor's declarations
///
/// Taken when the node is built, so the engine can keep evaluating the
/// node's policy after the executor itself has been consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorDescriptor {
    /// Prerequisite policy
    pub policy: PrerequisitePolicy,
    /// Passing mode for resolved values
    pub resolve_passing: ArgumentPassing,
    /// Passing mode for rejections
    pub reject_passing: ArgumentPassing,
    /// Declared settlement kinds
    pub capabilities: Capabilities,
}

impl ExecutorDescriptor {
    /// Describe an executor
    #[must_use]
    pub fn of<T: Payload, E: Payload>(executor: &dyn Executor<T, E>) -> Self {
        Self {
            policy: executor.prerequisite_policy(),
            resolve_passing: executor.resolve_argument_passing(),
            reject_passing: executor.reject_argument_passing(),
            capabilities: Capabilities {
                can_resolve: executor.can_resolve(),
                can_reject: executor.can_reject(),
            },
        }
    }

    /// Whether the node consumes any prerequisite payload by move
    #[must_use]
    pub const fn is_exclusive(&self) -> bool {
        self.resolve_passing.is_exclusive() || self.reject_passing.is_exclusive()
    }

    /// Passing mode for a payload of the given kind
    #[must_use]
    pub const fn passing_for(&self, rejected: bool) -> ArgumentPassing {
        if rejected {
            self.reject_passing
        } else {
            self.resolve_passing
        }
    }
}

/// Executor of manual promises
///
/// Its policy is `None`, so the engine never runs it; the node is settled
/// from outside. It only carries the capabilities checked on that
/// external settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoOpExecutor {
    capabilities: Capabilities,
}

impl NoOpExecutor {
    /// Create a no-op executor declaring the given capabilities
    #[must_use]
    pub const fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }
}

impl<T: Payload, E: Payload> Executor<T, E> for NoOpExecutor {
    fn prerequisite_policy(&self) -> PrerequisitePolicy {
        PrerequisitePolicy::None
    }

    fn can_resolve(&self) -> bool {
        self.capabilities.can_resolve
    }

    fn can_reject(&self) -> bool {
        self.capabilities.can_reject
    }

    fn execute(
        self: Box<Self>,
        _arguments: Arguments<T, E>,
        _resolver: &Resolver<T, E>,
    ) -> Result<(), E> {
        tracing::error!("no-op executor of a manual promise was executed");
        Ok(())
    }
}

/// General computation executor built from a closure
///
/// ```ignore
/// let executor = FnExecutor::new(PrerequisitePolicy::AllPrerequisites, |args, resolver| {
///     let sum: i64 = args.into_values().into_iter().sum();
///     resolver.resolve(sum).ok();
///     Ok(())
/// })
/// .with_resolve_passing(ArgumentPassing::ByMove);
/// ```
pub struct FnExecutor<T, E, F> {
    policy: PrerequisitePolicy,
    resolve_passing: ArgumentPassing,
    reject_passing: ArgumentPassing,
    capabilities: Capabilities,
    body: F,
    _marker: PhantomData<fn(T, E)>,
}

impl<T, E, F> FnExecutor<T, E, F>
where
    T: Payload,
    E: Payload,
    F: FnOnce(Arguments<T, E>, &Resolver<T, E>) -> Result<(), E> + Send + 'static,
{
    /// Create an executor with by-copy passing that may resolve and reject
    pub fn new(policy: PrerequisitePolicy, body: F) -> Self {
        Self {
            policy,
            resolve_passing: ArgumentPassing::ByCopy,
            reject_passing: ArgumentPassing::ByCopy,
            capabilities: Capabilities::both(),
            body,
            _marker: PhantomData,
        }
    }

    /// Set how resolved values are handed over
    #[must_use]
    pub fn with_resolve_passing(mut self, passing: ArgumentPassing) -> Self {
        self.resolve_passing = passing;
        self
    }

    /// Set how rejections are handed over
    #[must_use]
    pub fn with_reject_passing(mut self, passing: ArgumentPassing) -> Self {
        self.reject_passing = passing;
        self
    }

    /// Take every payload by move
    #[must_use]
    pub fn by_move(self) -> Self {
        self.with_resolve_passing(ArgumentPassing::ByMove)
            .with_reject_passing(ArgumentPassing::ByMove)
    }

    /// Restrict the settlement kinds the executor may produce
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl<T, E, F> Executor<T, E> for FnExecutor<T, E, F>
where
    T: Payload,
    E: Payload,
    F: FnOnce(Arguments<T, E>, &Resolver<T, E>) -> Result<(), E> + Send + 'static,
{
    fn prerequisite_policy(&self) -> PrerequisitePolicy {
        self.policy
    }

    fn resolve_argument_passing(&self) -> ArgumentPassing {
        self.resolve_passing
    }

    fn reject_argument_passing(&self) -> ArgumentPassing {
        self.reject_passing
    }

    fn can_resolve(&self) -> bool {
        self.capabilities.can_resolve
    }

    fn can_reject(&self) -> bool {
        self.capabilities.can_reject
    }

    fn execute(
        self: Box<Self>,
        arguments: Arguments<T, E>,
        resolver: &Resolver<T, E>,
    ) -> Result<(), E> {
        (self.body)(arguments, resolver)
    }
}
