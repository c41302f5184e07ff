//! Promise engine: graph construction, dispatch configuration, and
//! engine-wide observation.

use crate::dispatch::{InlineRunner, TaskRunner, TokioRunner};
use crate::executor::{Executor, ExecutorDescriptor, NoOpExecutor};
use crate::monitor::{Diagnostics, EngineMetrics, Metrics, RejectionReport, SettlementEvent};
use crate::node::{NodeInit, PromiseNode};
use crate::promise::Promise;
use crate::readiness;
use crate::settlement::Payload;
use pledge_core::{
    Capabilities, LogicalClock, LogicalTime, ObserverId, ObserverList, Origin,
    PrerequisitePolicy, PromiseError, PromiseResult, RejectPolicy,
};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;

/// Where executors run by default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// On the thread that made the promise ready
    #[default]
    Inline,
    /// On the tokio runtime current at engine creation
    Runtime,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default task runner
    pub dispatch: DispatchMode,
    /// Report rejected promises dropped without being observed
    pub report_unobserved_rejections: bool,
    /// Warn about derived promises whose executor can never run
    pub audit_capabilities: bool,
    /// Unobserved-rejection reports kept for inspection
    pub max_retained_reports: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::Inline,
            report_unobserved_rejections: true,
            audit_capabilities: true,
            max_retained_reports: 256,
        }
    }
}

impl EngineConfig {
    /// Set dispatch mode
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Enable or disable unobserved-rejection reports
    #[must_use]
    pub fn with_unobserved_reports(mut self, enabled: bool) -> Self {
        self.report_unobserved_rejections = enabled;
        self
    }

    /// Enable or disable the construction-time capability audit
    #[must_use]
    pub fn with_capability_audit(mut self, enabled: bool) -> Self {
        self.audit_capabilities = enabled;
        self
    }

    /// Set how many reports are retained
    #[must_use]
    pub fn with_max_retained_reports(mut self, max: usize) -> Self {
        self.max_retained_reports = max;
        self
    }
}

/// Per-promise construction options
#[derive(Clone, Default)]
pub struct NodeOptions {
    /// Name used in logs and reports
    pub label: Option<Arc<str>>,
    /// Whether dropping an unobserved rejection is reported
    pub reject_policy: RejectPolicy,
    /// Runner overriding the engine default
    pub runner: Option<Arc<dyn TaskRunner>>,
}

impl NodeOptions {
    /// Options with a label
    #[must_use]
    pub fn labeled(label: impl Into<Arc<str>>) -> Self {
        Self::default().with_label(label)
    }

    /// Set the label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<Arc<str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the reject policy
    #[must_use]
    pub fn with_reject_policy(mut self, policy: RejectPolicy) -> Self {
        self.reject_policy = policy;
        self
    }

    /// Run this promise's executor on a specific runner
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.runner = Some(runner);
        self
    }
}

impl std::fmt::Debug for NodeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeOptions")
            .field("label", &self.label)
            .field("reject_policy", &self.reject_policy)
            .field("runner", &self.runner.as_ref().map(|r| r.name()))
            .finish()
    }
}

/// State shared by an engine and every promise it built
#[derive(Debug)]
pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) clock: LogicalClock,
    pub(crate) metrics: EngineMetrics,
    pub(crate) observers: ObserverList<SettlementEvent>,
    pub(crate) diagnostics: Diagnostics,
}

/// Builds promise graphs over values `T` and errors `E`
///
/// Promises built by one engine share its clock, observers, metrics and
/// diagnostics. Mixing promises of different engines in one graph is
/// allowed; each settlement is recorded by the engine of the settled node.
pub struct Engine<T: Payload, E: Payload> {
    shared: Arc<EngineShared>,
    runner: Arc<dyn TaskRunner>,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<T: Payload, E: Payload> Engine<T, E> {
    /// Create an engine from configuration
    ///
    /// # Errors
    ///
    /// Returns error if `Runtime` dispatch is requested outside a tokio runtime
    pub fn new(config: EngineConfig) -> PromiseResult<Self> {
        let runner: Arc<dyn TaskRunner> = match config.dispatch {
            DispatchMode::Inline => Arc::new(InlineRunner),
            DispatchMode::Runtime => Arc::new(TokioRunner::current()?),
        };
        Ok(Self::with_runner(config, runner))
    }

    /// Create an engine with an explicit default runner
    #[must_use]
    pub fn with_runner(config: EngineConfig, runner: Arc<dyn TaskRunner>) -> Self {
        tracing::debug!(runner = runner.name(), ?config, "promise engine created");
        let diagnostics = Diagnostics::new(config.max_retained_reports);
        Self {
            shared: Arc::new(EngineShared {
                config,
                clock: LogicalClock::new(),
                metrics: EngineMetrics::default(),
                observers: ObserverList::new(),
                diagnostics,
            }),
            runner,
            _marker: PhantomData,
        }
    }

    /// Create an engine with default configuration and inline dispatch
    #[must_use]
    pub fn inline() -> Self {
        Self::with_runner(EngineConfig::default(), Arc::new(InlineRunner))
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Create a manual promise settled from outside
    #[must_use]
    #[track_caller]
    pub fn manual(&self, capabilities: Capabilities) -> Promise<T, E> {
        self.manual_with(capabilities, NodeOptions::default())
    }

    /// Create a manual promise with options
    #[must_use]
    #[track_caller]
    pub fn manual_with(&self, capabilities: Capabilities, options: NodeOptions) -> Promise<T, E> {
        let origin = Origin::caller();
        let node = PromiseNode::new(
            NodeInit {
                origin,
                label: options.label,
                reject_policy: options.reject_policy,
                executor: Box::new(NoOpExecutor::new(capabilities)),
                capabilities,
                prerequisites: Vec::new(),
                runner: options.runner.unwrap_or_else(|| Arc::clone(&self.runner)),
            },
            Arc::clone(&self.shared),
        );
        Promise::from_node(node)
    }

    /// Create a promise computed by `executor` from `prerequisites`
    ///
    /// # Errors
    ///
    /// `InvalidGraph` if the executor's policy cannot drive a derived
    /// promise, `ExclusiveArgument` if a by-move executor would share a
    /// prerequisite, `ValueConsumed` if a prerequisite's payload is gone.
    #[track_caller]
    pub fn derive<X>(&self, executor: X, prerequisites: &[&Promise<T, E>]) -> PromiseResult<Promise<T, E>>
    where
        X: Executor<T, E> + 'static,
    {
        self.derive_with(executor, prerequisites, NodeOptions::default())
    }

    /// Create a derived promise with options
    ///
    /// # Errors
    ///
    /// Same as [`Engine::derive`].
    #[track_caller]
    pub fn derive_with<X>(
        &self,
        executor: X,
        prerequisites: &[&Promise<T, E>],
        options: NodeOptions,
    ) -> PromiseResult<Promise<T, E>>
    where
        X: Executor<T, E> + 'static,
    {
        self.build(Origin::caller(), Box::new(executor), prerequisites, options)
    }

    fn build(
        &self,
        origin: Origin,
        executor: Box<dyn Executor<T, E>>,
        prerequisites: &[&Promise<T, E>],
        options: NodeOptions,
    ) -> PromiseResult<Promise<T, E>> {
        let descriptor = ExecutorDescriptor::of(&*executor);
        match descriptor.policy {
            PrerequisitePolicy::None => {
                return Err(PromiseError::InvalidGraph {
                    reason: format!("derived promise at {origin} has an executor with policy None"),
                });
            }
            PrerequisitePolicy::AnyOne if prerequisites.is_empty() => {
                return Err(PromiseError::InvalidGraph {
                    reason: format!("AnyOne promise at {origin} has no prerequisites"),
                });
            }
            PrerequisitePolicy::AnyOne | PrerequisitePolicy::AllPrerequisites => {}
        }

        let prerequisite_capabilities: Vec<Capabilities> =
            prerequisites.iter().map(|p| p.capabilities()).collect();
        if self.shared.config.audit_capabilities {
            for finding in readiness::audit(&descriptor, &prerequisite_capabilities) {
                tracing::warn!(%origin, %finding, "derived promise may never run its executor");
            }
        }

        let node = PromiseNode::new(
            NodeInit {
                origin,
                label: options.label,
                reject_policy: options.reject_policy,
                executor,
                capabilities: readiness::effective_capabilities(
                    &descriptor,
                    &prerequisite_capabilities,
                ),
                prerequisites: prerequisites.iter().map(|p| Arc::clone(p.node())).collect(),
                runner: options.runner.unwrap_or_else(|| Arc::clone(&self.runner)),
            },
            Arc::clone(&self.shared),
        );

        let exclusive = descriptor.is_exclusive();
        for (attached, prerequisite) in prerequisites.iter().enumerate() {
            if let Err(err) = prerequisite.node().attach_dependent(&node, exclusive) {
                for earlier in &prerequisites[..attached] {
                    earlier.node().detach_dependent(&node);
                }
                tracing::debug!(%origin, error = %err, "derived promise rejected at construction");
                return Err(err);
            }
        }

        node.arm();
        Ok(Promise::from_node(node))
    }

    /// Register a callback for every settlement of this engine's promises
    pub fn on_settled<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&SettlementEvent) + Send + Sync + 'static,
    {
        self.shared.observers.add(callback)
    }

    /// Remove a settlement callback; returns whether it was registered
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.shared.observers.remove(id)
    }

    /// Metrics snapshot
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        self.shared.metrics.snapshot()
    }

    /// Retained reports of rejections dropped without being observed
    #[must_use]
    pub fn unobserved_rejections(&self) -> Vec<RejectionReport> {
        self.shared.diagnostics.reports()
    }

    /// Take and clear the retained reports
    pub fn take_unobserved_rejections(&self) -> Vec<RejectionReport> {
        self.shared.diagnostics.drain()
    }

    /// Logical time of the latest settlement
    #[must_use]
    pub fn now(&self) -> LogicalTime {
        self.shared.clock.now()
    }

    /// Name of the default runner
    #[must_use]
    pub fn runner_name(&self) -> &'static str {
        self.runner.name()
    }
}

impl<T: Payload, E: Payload> Clone for Engine<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            runner: Arc::clone(&self.runner),
            _marker: PhantomData,
        }
    }
}

impl<T: Payload, E: Payload> std::fmt::Debug for Engine<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.shared.config)
            .field("runner", &self.runner.name())
            .field("now", &self.shared.clock.now())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Arguments, FnExecutor};
    use crate::resolver::Resolver;
    use pledge_core::{ArgumentPassing, SettlementKind, SettlementState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type TestEngine = Engine<i64, String>;

    fn sum(args: Arguments<i64, String>, resolver: &Resolver<i64, String>) -> Result<(), String> {
        resolver.resolve(args.into_values().into_iter().sum()).ok();
        Ok(())
    }

    fn all_sum() -> impl Executor<i64, String> {
        FnExecutor::new(PrerequisitePolicy::AllPrerequisites, sum)
    }

    fn all_sum_resolve_only() -> impl Executor<i64, String> {
        FnExecutor::new(PrerequisitePolicy::AllPrerequisites, sum).with_capabilities(Capabilities::resolve_only())
    }

    fn counting(counter: &Arc<AtomicUsize>) -> impl Executor<i64, String> + use<> {
        let counter = Arc::clone(counter);
        FnExecutor::new(PrerequisitePolicy::AnyOne, move |args: Arguments<i64, String>, resolver: &Resolver<i64, String>| {
            counter.fetch_add(1, Ordering::SeqCst);
            match args.into_outcome() {
                Some(Ok(value)) => resolver.resolve(value * 10).ok(),
                Some(Err(error)) => resolver.reject(error).ok(),
                None => None,
            };
            Ok(())
        })
    }

    #[test]
    fn test_manual_settles_once() {
        let engine = TestEngine::inline();
        let promise = engine.manual(Capabilities::both());
        assert_eq!(promise.state(), SettlementState::Pending);
        assert_eq!(promise.value_if_settled(), None);

        promise.resolve(7).unwrap();
        assert_eq!(
            promise.resolve(8),
            Err(PromiseError::AlreadySettled { id: promise.id() })
        );
        assert!(matches!(promise.reject("late".into()), Err(PromiseError::AlreadySettled { .. })));
        assert!(matches!(promise.cancel(), Err(PromiseError::AlreadySettled { .. })));
        assert_eq!(promise.state(), SettlementState::Resolved);
        assert_eq!(promise.value_if_settled(), Some(Ok(7)));
    }

    #[test]
    fn test_manual_capability_violation() {
        let engine = TestEngine::inline();
        let promise = engine.manual(Capabilities::resolve_only());

        assert_eq!(
            promise.reject("nope".into()),
            Err(PromiseError::CapabilityViolation {
                id: promise.id(),
                kind: SettlementKind::Rejected,
            })
        );
        assert_eq!(promise.state(), SettlementState::Pending);
        promise.resolve(1).unwrap();
    }

    #[test]
    fn test_concurrent_resolvers_single_winner() {
        let engine = TestEngine::inline();
        let promise = engine.manual(Capabilities::both());
        let winners = Mutex::new(Vec::new());
        let losers = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for value in 0..16 {
                let promise = promise.clone();
                let winners = &winners;
                let losers = &losers;
                scope.spawn(move || match promise.resolve(value) {
                    Ok(()) => winners.lock().unwrap().push(value),
                    Err(PromiseError::AlreadySettled { .. }) => {
                        losers.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                });
            }
        });

        let winners = winners.into_inner().unwrap();
        assert_eq!(winners.len(), 1);
        assert_eq!(losers.load(Ordering::SeqCst), 15);
        assert_eq!(promise.value_if_settled(), Some(Ok(winners[0])));
    }

    #[test]
    fn test_all_prerequisites_receive_values_in_order() {
        let engine = TestEngine::inline();
        let a = engine.manual(Capabilities::both());
        let b = engine.manual(Capabilities::both());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let joined = engine
            .derive(
                FnExecutor::new(PrerequisitePolicy::AllPrerequisites, move |args: Arguments<i64, String>, resolver: &Resolver<i64, String>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let values = args.into_values();
                    log.lock().unwrap().extend(values.iter().copied());
                    resolver.resolve(values.iter().sum()).ok();
                    Ok(())
                }),
                &[&a, &b],
            )
            .unwrap();

        b.resolve(2).unwrap();
        assert_eq!(joined.state(), SettlementState::Pending);
        a.resolve(1).unwrap();

        assert_eq!(joined.value_if_settled(), Some(Ok(3)));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_all_prerequisites_reject_with_lowest_index() {
        let engine = TestEngine::inline();
        let a = engine.manual(Capabilities::both());
        let b = engine.manual(Capabilities::both());
        let c = engine.manual(Capabilities::both());
        c.reject("third".into()).unwrap();
        b.reject("second".into()).unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let joined = engine
            .derive(
                FnExecutor::new(PrerequisitePolicy::AllPrerequisites, move |_args: Arguments<i64, String>, _resolver: &Resolver<i64, String>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                &[&a, &b, &c],
            )
            .unwrap();

        assert_eq!(joined.value_if_settled(), Some(Err("second".to_string())));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(a.state(), SettlementState::Pending);
        c.ignore_rejection();
    }

    #[test]
    fn test_all_prerequisites_short_circuit_before_others_settle() {
        let engine = TestEngine::inline();
        let a = engine.manual(Capabilities::both());
        let b = engine.manual(Capabilities::both());
        let joined = engine.derive(all_sum(), &[&a, &b]).unwrap();

        b.reject("boom".into()).unwrap();
        assert_eq!(joined.state(), SettlementState::Rejected);
        a.resolve(1).unwrap();
        assert_eq!(joined.value_if_settled(), Some(Err("boom".to_string())));
    }

    #[test]
    fn test_any_one_binds_first_settled_and_runs_once() {
        let engine = TestEngine::inline();
        let a = engine.manual(Capabilities::both());
        let b = engine.manual(Capabilities::both());
        let runs = Arc::new(AtomicUsize::new(0));
        let first = engine.derive(counting(&runs), &[&a, &b]).unwrap();

        b.resolve(4).unwrap();
        a.resolve(5).unwrap();

        assert_eq!(first.value_if_settled(), Some(Ok(40)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_any_one_binds_lowest_index_when_both_settled() {
        let engine = TestEngine::inline();
        let a = engine.manual(Capabilities::both());
        let b = engine.manual(Capabilities::both());
        b.resolve(2).unwrap();
        a.reject("first".into()).unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let first = engine.derive(counting(&runs), &[&a, &b]).unwrap();
        assert_eq!(first.value_if_settled(), Some(Err("first".to_string())));
    }

    #[test]
    fn test_any_one_waits_past_cancelled_prerequisites() {
        let engine = TestEngine::inline();
        let a = engine.manual(Capabilities::both());
        let b = engine.manual(Capabilities::both());
        let runs = Arc::new(AtomicUsize::new(0));
        let first = engine.derive(counting(&runs), &[&a, &b]).unwrap();

        a.cancel().unwrap();
        assert_eq!(first.state(), SettlementState::Pending);
        b.resolve(3).unwrap();
        assert_eq!(first.value_if_settled(), Some(Ok(30)));
    }

    #[test]
    fn test_any_one_cancelled_when_all_cancelled() {
        let engine = TestEngine::inline();
        let a = engine.manual(Capabilities::both());
        let b = engine.manual(Capabilities::both());
        let runs = Arc::new(AtomicUsize::new(0));
        let first = engine.derive(counting(&runs), &[&a, &b]).unwrap();

        a.cancel().unwrap();
        b.cancel().unwrap();
        assert_eq!(first.state(), SettlementState::Cancelled);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_propagates_transitively() {
        let engine = TestEngine::inline();
        let root = engine.manual(Capabilities::both());
        let middle = engine.derive(all_sum(), &[&root]).unwrap();
        let leaf = engine.derive(all_sum(), &[&middle]).unwrap();

        root.cancel().unwrap();
        assert_eq!(middle.state(), SettlementState::Cancelled);
        assert_eq!(leaf.state(), SettlementState::Cancelled);
        assert!(matches!(leaf.cancel(), Err(PromiseError::AlreadySettled { .. })));
    }

    #[test]
    fn test_cancel_leaves_settled_dependents_untouched() {
        let engine = TestEngine::inline();
        let root = engine.manual(Capabilities::both());
        let other = engine.manual(Capabilities::both());
        let runs = Arc::new(AtomicUsize::new(0));
        let settled = engine.derive(counting(&runs), &[&root, &other]).unwrap();
        let pending = engine.derive(all_sum(), &[&root]).unwrap();

        other.resolve(1).unwrap();
        assert_eq!(settled.value_if_settled(), Some(Ok(10)));

        root.cancel().unwrap();
        assert_eq!(settled.value_if_settled(), Some(Ok(10)));
        assert_eq!(pending.state(), SettlementState::Cancelled);
    }

    #[test]
    fn test_by_move_requires_exclusive_prerequisite() {
        let engine = TestEngine::inline();
        let source = engine.manual(Capabilities::both());
        let _first = engine.derive(all_sum(), &[&source]).unwrap();

        let err = engine
            .derive(FnExecutor::new(PrerequisitePolicy::AllPrerequisites, sum).by_move(), &[&source])
            .unwrap_err();
        assert_eq!(err, PromiseError::ExclusiveArgument { prerequisite: source.id() });
        assert_eq!(source.dependent_count(), 1);
    }

    #[test]
    fn test_by_move_blocks_later_dependents() {
        let engine = TestEngine::inline();
        let a = engine.manual(Capabilities::both());
        let b = engine.manual(Capabilities::both());
        let _moving = engine
            .derive(FnExecutor::new(PrerequisitePolicy::AllPrerequisites, sum).by_move(), &[&b])
            .unwrap();

        let err = engine.derive(all_sum(), &[&a, &b]).unwrap_err();
        assert_eq!(err, PromiseError::ExclusiveArgument { prerequisite: b.id() });
        // The failed construction left no edge behind on `a`.
        assert_eq!(a.dependent_count(), 0);
    }

    #[test]
    fn test_by_move_consumes_value() {
        let engine = TestEngine::inline();
        let source = engine.manual(Capabilities::both());
        let moved = engine
            .derive(
                FnExecutor::new(PrerequisitePolicy::AllPrerequisites, sum)
                    .with_resolve_passing(ArgumentPassing::ByMove),
                &[&source],
            )
            .unwrap();

        source.resolve(9).unwrap();
        assert_eq!(moved.value_if_settled(), Some(Ok(9)));
        assert_eq!(source.state(), SettlementState::Resolved);
        assert_eq!(source.value(), Err(PromiseError::ValueConsumed { id: source.id() }));
        assert_eq!(source.value_if_settled(), None);

        drop(moved);
        assert!(matches!(
            engine.derive(all_sum(), &[&source]),
            Err(PromiseError::ValueConsumed { .. })
        ));
    }

    #[test]
    fn test_by_copy_fans_out() {
        let engine = TestEngine::inline();
        let source = engine.manual(Capabilities::both());
        let left = engine.derive(all_sum(), &[&source]).unwrap();
        let right = engine.derive(all_sum(), &[&source]).unwrap();
        assert_eq!(source.dependent_count(), 2);

        source.resolve(5).unwrap();
        assert_eq!(left.value_if_settled(), Some(Ok(5)));
        assert_eq!(right.value_if_settled(), Some(Ok(5)));
        assert_eq!(source.value_if_settled(), Some(Ok(5)));
    }

    #[test]
    fn test_executor_error_rejects_and_propagates() {
        let engine = TestEngine::inline();
        let source = engine.manual(Capabilities::both());
        let failing = engine
            .derive(
                FnExecutor::new(PrerequisitePolicy::AllPrerequisites, |_args: Arguments<i64, String>, _resolver: &Resolver<i64, String>| {
                    Err("executor failed".to_string())
                }),
                &[&source],
            )
            .unwrap();
        let downstream = engine.derive(all_sum(), &[&failing]).unwrap();

        source.resolve(1).unwrap();
        assert_eq!(failing.state(), SettlementState::Rejected);
        assert_eq!(downstream.value_if_settled(), Some(Err("executor failed".to_string())));
    }

    #[test]
    fn test_executor_error_after_settling_keeps_settlement() {
        let engine = TestEngine::inline();
        let source = engine.manual(Capabilities::both());
        let promise = engine
            .derive(
                FnExecutor::new(PrerequisitePolicy::AllPrerequisites, |_args: Arguments<i64, String>, resolver: &Resolver<i64, String>| {
                    resolver.resolve(1).ok();
                    Err("too late".to_string())
                }),
                &[&source],
            )
            .unwrap();

        source.resolve(0).unwrap();
        assert_eq!(promise.value_if_settled(), Some(Ok(1)));
    }

    #[test]
    fn test_dropped_resolver_cancels() {
        let engine = TestEngine::inline();
        let source = engine.manual(Capabilities::both());
        let forgetful = engine
            .derive(
                FnExecutor::new(PrerequisitePolicy::AllPrerequisites, |_args: Arguments<i64, String>, _resolver: &Resolver<i64, String>| Ok(())),
                &[&source],
            )
            .unwrap();

        source.resolve(1).unwrap();
        assert_eq!(forgetful.state(), SettlementState::Cancelled);
    }

    #[test]
    fn test_resolver_settles_from_another_thread() {
        let engine = TestEngine::inline();
        let source = engine.manual(Capabilities::both());
        let (tx, rx) = std::sync::mpsc::channel();
        let deferred = engine
            .derive(
                FnExecutor::new(PrerequisitePolicy::AllPrerequisites, move |args: Arguments<i64, String>, resolver: &Resolver<i64, String>| {
                    tx.send((args.into_values(), resolver.clone())).ok();
                    Ok(())
                }),
                &[&source],
            )
            .unwrap();

        source.resolve(6).unwrap();
        assert_eq!(deferred.state(), SettlementState::Pending);

        let (values, resolver) = rx.recv().unwrap();
        std::thread::spawn(move || resolver.resolve(values[0] * 7).unwrap())
            .join()
            .unwrap();
        assert_eq!(deferred.value_if_settled(), Some(Ok(42)));
    }

    #[test]
    fn test_resolver_capability_violation() {
        let engine = TestEngine::inline();
        let source = engine.manual(Capabilities::resolve_only());
        let violations = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&violations);
        let promise = engine
            .derive(
                FnExecutor::new(PrerequisitePolicy::AllPrerequisites, move |_args: Arguments<i64, String>, resolver: &Resolver<i64, String>| {
                    if let Err(err) = resolver.reject("not allowed".into()) {
                        log.lock().unwrap().push(err);
                    }
                    Ok(())
                })
                .with_capabilities(Capabilities::resolve_only()),
                &[&source],
            )
            .unwrap();

        source.resolve(1).unwrap();
        assert_eq!(
            *violations.lock().unwrap(),
            vec![PromiseError::CapabilityViolation {
                id: promise.id(),
                kind: SettlementKind::Rejected,
            }]
        );
        assert_eq!(promise.state(), SettlementState::Cancelled);
    }

    #[test]
    fn test_all_promise_inherits_rejection_capability() {
        let engine = TestEngine::inline();
        let rejecting = engine.manual(Capabilities::both());
        let resolving = engine.manual(Capabilities::resolve_only());
        let executor = || FnExecutor::new(PrerequisitePolicy::AllPrerequisites, sum).with_capabilities(Capabilities::resolve_only());

        let inherits = engine.derive(executor(), &[&rejecting]).unwrap();
        assert_eq!(inherits.capabilities(), Capabilities::both());

        let strict = engine.derive(executor(), &[&resolving]).unwrap();
        assert_eq!(strict.capabilities(), Capabilities::resolve_only());
        assert!(matches!(
            strict.reject("external".into()),
            Err(PromiseError::CapabilityViolation { .. })
        ));
    }

    #[test]
    fn test_inherited_rejection_does_not_widen_resolver() {
        let engine = TestEngine::inline();
        let source = engine.manual(Capabilities::both());
        let violations = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&violations);
        let promise = engine
            .derive(
                FnExecutor::new(PrerequisitePolicy::AllPrerequisites, move |_args: Arguments<i64, String>, resolver: &Resolver<i64, String>| {
                    if let Err(err) = resolver.reject("not declared".into()) {
                        log.lock().unwrap().push(err);
                    }
                    Ok(())
                })
                .with_capabilities(Capabilities::resolve_only()),
                &[&source],
            )
            .unwrap();
        assert_eq!(promise.capabilities(), Capabilities::both());
        assert!(matches!(
            promise.reject("external".into()),
            Err(PromiseError::CapabilityViolation { .. })
        ));

        source.resolve(1).unwrap();
        assert_eq!(
            *violations.lock().unwrap(),
            vec![PromiseError::CapabilityViolation {
                id: promise.id(),
                kind: SettlementKind::Rejected,
            }]
        );
        assert_eq!(promise.state(), SettlementState::Cancelled);
    }

    #[test]
    fn test_forwarded_rejection_allowed_for_resolve_only_executor() {
        let engine = TestEngine::inline();
        let source = engine.manual(Capabilities::both());
        let promise = engine
            .derive(all_sum_resolve_only(), &[&source])
            .unwrap();

        source.reject("upstream".into()).unwrap();
        assert_eq!(promise.value_if_settled(), Some(Err("upstream".to_string())));
    }

    #[test]
    fn test_panicking_executor_does_not_strand_siblings() {
        let engine = TestEngine::inline();
        let source = engine.manual(Capabilities::both());
        let failing = engine
            .then(&source, |_: i64| -> Result<i64, String> { panic!("executor failure") })
            .unwrap();
        let sibling = engine.then(&source, |v| Ok(v + 1)).unwrap();
        let downstream = engine.then(&sibling, |v| Ok(v * 10)).unwrap();

        source.resolve(1).unwrap();
        assert_eq!(failing.state(), SettlementState::Cancelled);
        assert_eq!(sibling.value_if_settled(), Some(Ok(2)));
        assert_eq!(downstream.value_if_settled(), Some(Ok(20)));
    }

    #[test]
    fn test_invalid_graphs() {
        let engine = TestEngine::inline();
        let source = engine.manual(Capabilities::both());

        let manual_policy = NoOpExecutor::new(Capabilities::both());
        assert!(matches!(
            engine.derive(manual_policy, &[&source]),
            Err(PromiseError::InvalidGraph { .. })
        ));

        let runs = Arc::new(AtomicUsize::new(0));
        assert!(matches!(
            engine.derive(counting(&runs), &[]),
            Err(PromiseError::InvalidGraph { .. })
        ));
    }

    #[test]
    fn test_all_with_no_prerequisites_runs_immediately() {
        let engine = TestEngine::inline();
        let empty = engine.derive(all_sum(), &[]).unwrap();
        assert_eq!(empty.value_if_settled(), Some(Ok(0)));
    }

    #[test]
    fn test_dependents_keep_prerequisites_alive() {
        let engine = TestEngine::inline();
        let root = engine.manual(Capabilities::both());
        let middle = engine.derive(all_sum(), &[&root]).unwrap();
        let leaf = engine.derive(all_sum(), &[&middle]).unwrap();
        drop(middle);

        root.resolve(11).unwrap();
        assert_eq!(leaf.value_if_settled(), Some(Ok(11)));
    }

    #[test]
    fn test_deep_inline_chain() {
        let engine = TestEngine::inline();
        let root = engine.manual(Capabilities::both());
        let mut tail = root.clone();
        for _ in 0..10_000 {
            tail = engine
                .derive(
                    FnExecutor::new(PrerequisitePolicy::AllPrerequisites, |args: Arguments<i64, String>, resolver: &Resolver<i64, String>| {
                        resolver.resolve(args.into_values()[0] + 1).ok();
                        Ok(())
                    }),
                    &[&tail],
                )
                .unwrap();
        }

        root.resolve(0).unwrap();
        assert_eq!(tail.value_if_settled(), Some(Ok(10_000)));
    }

    #[test]
    fn test_deep_unsettled_chain_drops() {
        let engine = TestEngine::inline();
        let mut tail = engine.manual(Capabilities::both());
        for _ in 0..50_000 {
            tail = engine.derive(all_sum(), &[&tail]).unwrap();
        }
        drop(tail);
        assert_eq!(engine.metrics().promises_created, 50_001);
    }

    #[test]
    fn test_unobserved_rejection_reported_on_drop() {
        let engine = TestEngine::inline();
        let promise = engine.manual_with(Capabilities::both(), NodeOptions::labeled("fetch"));
        let id = promise.id();
        promise.reject("lost".into()).unwrap();
        drop(promise);

        let reports = engine.unobserved_rejections();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].promise, id);
        assert_eq!(reports[0].label.as_deref(), Some("fetch"));
        assert!(reports[0].origin.file.ends_with("engine.rs"));
        assert!(matches!(
            reports[0].to_error(),
            PromiseError::UnobservedRejection { .. }
        ));
        assert_eq!(engine.metrics().unobserved_rejections, 1);
    }

    #[test]
    fn test_observed_rejections_not_reported() {
        let engine = TestEngine::inline();

        let read = engine.manual(Capabilities::both());
        read.reject("seen".into()).unwrap();
        assert!(read.value_if_settled().is_some());
        drop(read);

        let ignorable = engine.manual_with(
            Capabilities::both(),
            NodeOptions::default().with_reject_policy(RejectPolicy::CanIgnoreRejection),
        );
        ignorable.reject("fine".into()).unwrap();
        drop(ignorable);

        let ignored = engine.manual(Capabilities::both());
        ignored.reject("handled".into()).unwrap();
        ignored.ignore_rejection();
        drop(ignored);

        let forwarded = engine.manual(Capabilities::both());
        let dependent = engine.derive(all_sum(), &[&forwarded]).unwrap();
        forwarded.reject("passed on".into()).unwrap();
        drop(forwarded);
        assert_eq!(dependent.value_if_settled(), Some(Err("passed on".to_string())));
        drop(dependent);

        assert!(engine.unobserved_rejections().is_empty());
    }

    #[test]
    fn test_unobserved_reports_can_be_disabled() {
        let engine = TestEngine::with_runner(
            EngineConfig::default().with_unobserved_reports(false),
            Arc::new(InlineRunner),
        );
        let promise = engine.manual(Capabilities::both());
        promise.reject("quiet".into()).unwrap();
        drop(promise);
        assert!(engine.take_unobserved_rejections().is_empty());
    }

    #[test]
    fn test_settlement_observers_and_clock() {
        let engine = TestEngine::inline();
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&events);
        let observer = engine.on_settled(move |event| log.lock().unwrap().push(event.clone()));

        let root = engine.manual(Capabilities::both());
        let child = engine.derive(all_sum(), &[&root]).unwrap();
        root.resolve(1).unwrap();

        {
            let events = events.lock().unwrap();
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].promise, root.id());
            assert_eq!(events[1].promise, child.id());
            assert!(events[0].at < events[1].at);
        }
        assert!(root.settled_at() < child.settled_at());
        assert_eq!(engine.now(), events.lock().unwrap()[1].at);

        assert!(engine.remove_observer(observer));
        engine.manual(Capabilities::both()).cancel().unwrap();
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_metrics() {
        let engine = TestEngine::inline();
        let a = engine.manual(Capabilities::both());
        let b = engine.derive(all_sum(), &[&a]).unwrap();
        let c = engine.manual(Capabilities::both());
        a.resolve(1).unwrap();
        c.cancel().unwrap();
        assert_eq!(b.state(), SettlementState::Resolved);

        let metrics = engine.metrics();
        assert_eq!(metrics.promises_created, 3);
        assert_eq!(metrics.executions, 1);
        assert_eq!(metrics.resolved, 2);
        assert_eq!(metrics.cancelled, 1);
    }

    #[test]
    fn test_runtime_dispatch_requires_runtime() {
        let err = TestEngine::new(EngineConfig::default().with_dispatch(DispatchMode::Runtime)).unwrap_err();
        assert!(matches!(err, PromiseError::Runtime { .. }));
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"dispatch":"runtime"}"#).unwrap();
        assert_eq!(config.dispatch, DispatchMode::Runtime);
        assert!(config.report_unobserved_rejections);
        assert_eq!(config.max_retained_reports, 256);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_runtime_dispatch_matches_inline() {
        fn build(engine: &TestEngine) -> (Promise<i64, String>, Promise<i64, String>, Promise<i64, String>) {
            let a = engine.manual(Capabilities::both());
            let b = engine.manual(Capabilities::both());
            let doubled = engine
                .derive(
                    FnExecutor::new(PrerequisitePolicy::AllPrerequisites, |args: Arguments<i64, String>, resolver: &Resolver<i64, String>| {
                        resolver.resolve(args.into_values()[0] * 2).ok();
                        Ok(())
                    }),
                    &[&a],
                )
                .unwrap();
            let total = engine.derive(all_sum(), &[&doubled, &b]).unwrap();
            (a, b, total)
        }

        let inline = TestEngine::inline();
        let (a, b, expected) = build(&inline);
        a.resolve(3).unwrap();
        b.resolve(4).unwrap();

        let runtime = TestEngine::new(EngineConfig::default().with_dispatch(DispatchMode::Runtime)).unwrap();
        assert_eq!(runtime.runner_name(), "tokio");
        let (a, b, total) = build(&runtime);
        let done = Arc::new(tokio::sync::Notify::new());
        let notify = Arc::clone(&done);
        let total_id = total.id();
        runtime.on_settled(move |event| {
            if event.promise == total_id {
                notify.notify_one();
            }
        });
        a.resolve(3).unwrap();
        b.resolve(4).unwrap();
        done.notified().await;

        assert_eq!(total.value_if_settled(), expected.value_if_settled());
        assert_eq!(total.value_if_settled(), Some(Ok(10)));
    }
}
