//! Promise node and the propagation algorithm.
//!
//! Ownership runs from dependents to prerequisites: a node holds its
//! prerequisites strongly until it settles, and prerequisites only know
//! their dependents through `Weak` back-references. A settled node
//! therefore never keeps the graph upstream of it alive.
//!
//! Lock order: `dependents` before `value` of the same node. No lock is
//! held while another node's lock is taken, and executors and callbacks
//! always run with no engine lock held.

use crate::dispatch::{self, TaskRunner};
use crate::engine::EngineShared;
use crate::executor::{Arguments, Executor, ExecutorDescriptor};
use crate::monitor::{RejectionReport, SettlementEvent};
use crate::readiness::{self, Binding, Readiness};
use crate::resolver::Resolver;
use crate::settlement::{Outcome, Payload, SettlementValue, StateCell};
use pledge_core::{
    sync::lock, Capabilities, LogicalTime, Origin, PromiseError, PromiseId, PromiseResult,
    RejectPolicy, SettlementKind, SettlementState,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Back-reference from a prerequisite to one of its dependents
struct DependentEntry<T: Payload, E: Payload> {
    node: Weak<PromiseNode<T, E>>,
    exclusive: bool,
}

/// Everything a node is built from
pub(crate) struct NodeInit<T: Payload, E: Payload> {
    pub(crate) origin: Origin,
    pub(crate) label: Option<Arc<str>>,
    pub(crate) reject_policy: RejectPolicy,
    pub(crate) executor: Box<dyn Executor<T, E>>,
    pub(crate) capabilities: Capabilities,
    pub(crate) prerequisites: Vec<Arc<PromiseNode<T, E>>>,
    pub(crate) runner: Arc<dyn TaskRunner>,
}

/// Graph vertex holding one settlement
pub(crate) struct PromiseNode<T: Payload, E: Payload> {
    id: PromiseId,
    origin: Origin,
    label: Option<Arc<str>>,
    descriptor: ExecutorDescriptor,
    /// Declared capabilities plus inherited rejection
    capabilities: Capabilities,
    reject_policy: RejectPolicy,
    state: StateCell,
    settled_at: AtomicU64,
    value: Mutex<SettlementValue<T, E>>,
    rejection_observed: AtomicBool,
    /// Set once every prerequisite edge is attached
    armed: AtomicBool,
    prerequisites: Mutex<Vec<Arc<PromiseNode<T, E>>>>,
    dependents: Mutex<Vec<DependentEntry<T, E>>>,
    executor: Mutex<Option<Box<dyn Executor<T, E>>>>,
    runner: Arc<dyn TaskRunner>,
    shared: Arc<EngineShared>,
}

impl<T: Payload, E: Payload> PromiseNode<T, E> {
    pub(crate) fn new(init: NodeInit<T, E>, shared: Arc<EngineShared>) -> Arc<Self> {
        let descriptor = ExecutorDescriptor::of(&*init.executor);
        let id = PromiseId::new();
        shared.metrics.record_created();
        tracing::trace!(promise = %id, origin = %init.origin, policy = ?descriptor.policy, "promise created");

        Arc::new(Self {
            id,
            origin: init.origin,
            label: init.label,
            descriptor,
            capabilities: init.capabilities,
            reject_policy: init.reject_policy,
            state: StateCell::new(),
            settled_at: AtomicU64::new(0),
            value: Mutex::new(SettlementValue::Unsettled),
            rejection_observed: AtomicBool::new(false),
            armed: AtomicBool::new(false),
            prerequisites: Mutex::new(init.prerequisites),
            dependents: Mutex::new(Vec::new()),
            executor: Mutex::new(Some(init.executor)),
            runner: init.runner,
            shared,
        })
    }

    pub(crate) fn id(&self) -> PromiseId {
        self.id
    }

    pub(crate) fn origin(&self) -> Origin {
        self.origin
    }

    pub(crate) fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn descriptor(&self) -> &ExecutorDescriptor {
        &self.descriptor
    }

    pub(crate) fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub(crate) fn reject_policy(&self) -> RejectPolicy {
        self.reject_policy
    }

    pub(crate) fn state(&self) -> SettlementState {
        self.state.load()
    }

    pub(crate) fn settled_at(&self) -> Option<LogicalTime> {
        if self.state().is_settled() {
            Some(LogicalTime::from_raw(self.settled_at.load(Ordering::Acquire)))
        } else {
            None
        }
    }

    pub(crate) fn mark_observed(&self) {
        self.rejection_observed.store(true, Ordering::Release);
    }

    /// Clone of the settled payload
    ///
    /// # Errors
    ///
    /// `ValueConsumed` once the payload was moved to a dependent.
    pub(crate) fn value(&self) -> PromiseResult<Option<Result<T, E>>> {
        if !self.state().has_payload() {
            return Ok(None);
        }
        let value = lock(&self.value);
        if value.is_moved() {
            return Err(PromiseError::ValueConsumed { id: self.id });
        }
        let payload = value.copy();
        drop(value);
        if matches!(payload, Some(Err(_))) {
            self.mark_observed();
        }
        Ok(payload)
    }

    pub(crate) fn dependent_count(&self) -> usize {
        lock(&self.dependents)
            .iter()
            .filter(|entry| entry.node.strong_count() > 0)
            .count()
    }

    /// Settle the node from outside the engine or through a resolver
    ///
    /// `checked` settlements must match what the executor declared;
    /// rejection inherited from prerequisites does not count. Propagated
    /// rejections and cancellations skip the check.
    pub(crate) fn settle(self: &Arc<Self>, outcome: Outcome<T, E>, checked: bool) -> PromiseResult<()> {
        if checked {
            if let Some(kind) = outcome.kind() {
                self.check_capability(kind)?;
            }
        }
        if !self.state.try_begin() {
            return Err(PromiseError::AlreadySettled { id: self.id });
        }
        self.complete(outcome);
        Ok(())
    }

    fn check_capability(&self, kind: SettlementKind) -> PromiseResult<()> {
        let declared = self.descriptor.capabilities;
        if declared.allows(kind) {
            return Ok(());
        }
        tracing::error!(
            promise = %self.id,
            origin = %self.origin,
            %kind,
            capabilities = %declared,
            "settlement violates declared capabilities"
        );
        Err(PromiseError::CapabilityViolation { id: self.id, kind })
    }

    /// Publish a settlement won through `try_begin` and propagate it
    fn complete(self: &Arc<Self>, outcome: Outcome<T, E>) {
        let state = outcome.state();
        *lock(&self.value) = outcome.into();
        let at = self.shared.clock.tick();
        self.settled_at.store(at.as_u64(), Ordering::Release);
        self.state.publish(state);
        self.shared.metrics.record_settlement(state);
        tracing::debug!(promise = %self.id, %state, %at, label = ?self.label, "promise settled");

        let executor = lock(&self.executor).take();
        drop(executor);
        let prerequisites = std::mem::take(&mut *lock(&self.prerequisites));
        drop(prerequisites);

        self.propagate(SettlementEvent {
            promise: self.id,
            state,
            at,
            label: self.label.clone(),
        });
    }

    fn propagate(&self, event: SettlementEvent) {
        self.shared.observers.notify(&event);

        let dependents: Vec<Arc<Self>> = lock(&self.dependents)
            .iter()
            .filter_map(|entry| entry.node.upgrade())
            .collect();
        for dependent in dependents {
            dispatch::defer(move || dependent.reevaluate());
        }
    }

    fn prerequisite_snapshot(&self) -> Vec<Arc<Self>> {
        lock(&self.prerequisites).clone()
    }

    fn evaluate(&self, prerequisites: &[Arc<Self>]) -> Readiness {
        let states: Vec<SettlementState> = prerequisites.iter().map(|p| p.state()).collect();
        readiness::evaluate(self.descriptor.policy, &states)
    }

    /// Allow propagation into this node and run its first evaluation
    pub(crate) fn arm(self: &Arc<Self>) {
        self.armed.store(true, Ordering::Release);
        let node = Arc::clone(self);
        dispatch::defer(move || node.reevaluate());
    }

    /// Re-scan the prerequisites and act on the result
    fn reevaluate(self: &Arc<Self>) {
        if !self.armed.load(Ordering::Acquire) || !self.state.is_open() {
            return;
        }
        let prerequisites = self.prerequisite_snapshot();
        match self.evaluate(&prerequisites) {
            Readiness::Waiting => {}
            Readiness::Cancel => {
                if self.settle(Outcome::Cancelled, false).is_ok() {
                    tracing::debug!(promise = %self.id, "cancelled with its prerequisites");
                }
            }
            Readiness::Reject { index } => self.forward_rejection(&prerequisites, index),
            Readiness::Execute(_) => self.claim_and_dispatch(),
        }
    }

    /// Reject with the rejection of a prerequisite, without running the executor
    fn forward_rejection(self: &Arc<Self>, prerequisites: &[Arc<Self>], index: usize) {
        if !self.state.try_begin() {
            return;
        }
        let error = match prerequisites.get(index).map(|p| p.hand_off(&self.descriptor)) {
            Some(Ok(Err(error))) => Some(error),
            Some(Err(err)) => {
                tracing::error!(promise = %self.id, index, error = %err, "cannot forward rejection");
                None
            }
            Some(Ok(Ok(_))) | None => None,
        };
        match error {
            Some(error) => {
                tracing::debug!(promise = %self.id, index, "rejected by prerequisite");
                self.complete(Outcome::Rejected(error));
            }
            None => self.complete(Outcome::Cancelled),
        }
    }

    /// Take the executor, bind its arguments, and post it to the runner
    ///
    /// Taking the executor out of its slot is what makes exactly one thread
    /// the dispatcher of a node.
    fn claim_and_dispatch(self: &Arc<Self>) {
        let Some(executor) = lock(&self.executor).take() else {
            return;
        };
        if !self.state.is_open() {
            return;
        }

        let prerequisites = self.prerequisite_snapshot();
        let Readiness::Execute(binding) = self.evaluate(&prerequisites) else {
            *lock(&self.executor) = Some(executor);
            return;
        };

        let arguments = match self.bind(binding, &prerequisites) {
            Ok(arguments) => arguments,
            Err(err) => {
                tracing::error!(promise = %self.id, error = %err, "cannot bind executor arguments");
                drop(executor);
                let _ = self.settle(Outcome::Cancelled, false);
                return;
            }
        };

        tracing::trace!(promise = %self.id, runner = self.runner.name(), "dispatching executor");
        let node = Arc::clone(self);
        self.runner.post(Box::new(move || node.run(executor, arguments)));
    }

    fn bind(&self, binding: Binding, prerequisites: &[Arc<Self>]) -> PromiseResult<Arguments<T, E>> {
        match binding {
            Binding::Single(index) => {
                let prerequisite = prerequisites.get(index).ok_or_else(|| PromiseError::InvalidGraph {
                    reason: format!("{} has no prerequisite {}", self.id, index),
                })?;
                let outcome = prerequisite.hand_off(&self.descriptor)?;
                Ok(Arguments::Single { index, outcome })
            }
            Binding::All => prerequisites
                .iter()
                .map(|prerequisite| match prerequisite.hand_off(&self.descriptor)? {
                    Ok(value) => Ok(value),
                    Err(_) => Err(PromiseError::InvalidGraph {
                        reason: format!("{} rejected after it resolved", prerequisite.id),
                    }),
                })
                .collect::<PromiseResult<Vec<T>>>()
                .map(Arguments::All),
        }
    }

    /// Hand this node's payload to a dependent, by copy or by move
    fn hand_off(&self, consumer: &ExecutorDescriptor) -> PromiseResult<Result<T, E>> {
        let mut value = lock(&self.value);
        let rejected = value.kind() == Some(SettlementKind::Rejected);
        let payload = if consumer.passing_for(rejected).is_exclusive() {
            value.take()
        } else {
            value.copy()
        };
        drop(value);

        let payload = payload.ok_or(PromiseError::ValueConsumed { id: self.id })?;
        if payload.is_err() {
            self.mark_observed();
        }
        Ok(payload)
    }

    fn run(self: Arc<Self>, executor: Box<dyn Executor<T, E>>, arguments: Arguments<T, E>) {
        if !self.state.is_open() {
            tracing::trace!(promise = %self.id, "promise settled before its executor ran");
            return;
        }
        self.shared.metrics.record_execution();

        let resolver = Resolver::new(Arc::clone(&self));
        // A panic stays inside this node; queued siblings still run.
        let result = panic::catch_unwind(AssertUnwindSafe(|| executor.execute(arguments, &resolver)));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(error)) => match self.settle(Outcome::Rejected(error), false) {
                Ok(()) => tracing::debug!(promise = %self.id, "executor failed"),
                Err(err) => tracing::warn!(
                    promise = %self.id,
                    error = %err,
                    "executor returned an error after its promise settled"
                ),
            },
            Err(payload) => {
                tracing::error!(
                    promise = %self.id,
                    origin = %self.origin,
                    panic = panic_message(payload.as_ref()),
                    "executor panicked"
                );
                let _ = self.settle(Outcome::Cancelled, false);
            }
        }
    }

    /// Register a dependent on this node
    ///
    /// # Errors
    ///
    /// `ExclusiveArgument` when a by-move consumer would share this node,
    /// `ValueConsumed` when its payload is already gone.
    pub(crate) fn attach_dependent(&self, dependent: &Arc<Self>, exclusive: bool) -> PromiseResult<()> {
        let mut dependents = lock(&self.dependents);
        dependents.retain(|entry| entry.node.strong_count() > 0);

        if lock(&self.value).is_moved() {
            return Err(PromiseError::ValueConsumed { id: self.id });
        }
        if dependents.iter().any(|entry| entry.exclusive) || (exclusive && !dependents.is_empty()) {
            return Err(PromiseError::ExclusiveArgument {
                prerequisite: self.id,
            });
        }

        dependents.push(DependentEntry {
            node: Arc::downgrade(dependent),
            exclusive,
        });
        Ok(())
    }

    pub(crate) fn detach_dependent(&self, dependent: &Arc<Self>) {
        lock(&self.dependents).retain(|entry| Weak::as_ptr(&entry.node) != Arc::as_ptr(dependent));
    }

    fn report_unobserved_rejection(&self) {
        let report = RejectionReport {
            promise: self.id,
            origin: self.origin,
            label: self.label.clone(),
            at: LogicalTime::from_raw(self.settled_at.load(Ordering::Acquire)),
        };
        tracing::error!(
            promise = %self.id,
            origin = %self.origin,
            label = ?self.label,
            "rejected promise dropped without its rejection being observed"
        );
        self.shared.metrics.record_unobserved();
        self.shared.diagnostics.record(report);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl<T: Payload, E: Payload> Drop for PromiseNode<T, E> {
    fn drop(&mut self) {
        if self.state.load() == SettlementState::Rejected
            && self.reject_policy == RejectPolicy::MustCatchRejection
            && !self.rejection_observed.load(Ordering::Acquire)
            && self.shared.config.report_unobserved_rejections
        {
            self.report_unobserved_rejection();
        }

        // Unwind long unsettled chains iteratively.
        let mut pending = std::mem::take(
            self.prerequisites
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        while let Some(prerequisite) = pending.pop() {
            if let Ok(mut node) = Arc::try_unwrap(prerequisite) {
                pending.append(
                    node.prerequisites
                        .get_mut()
                        .unwrap_or_else(PoisonError::into_inner),
                );
            }
        }
    }
}
