//! PLEDGE Runtime
//!
//! Promise-graph execution engine. Nodes hold a one-time settlement,
//! executors compute them once their prerequisites satisfy a policy, and
//! settlements propagate to dependents through a pluggable task runner.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod dispatch;
pub mod engine;
pub mod executor;
pub mod monitor;
mod node;
pub mod promise;
pub mod readiness;
pub mod resolver;
pub mod settlement;
pub mod signal;

pub use adapters::SettledFuture;
pub use dispatch::{InlineRunner, Task, TaskRunner, TokioRunner};
pub use engine::{DispatchMode, Engine, EngineConfig, NodeOptions};
pub use executor::{Arguments, Executor, ExecutorDescriptor, FnExecutor, NoOpExecutor};
pub use monitor::{Metrics, RejectionReport, SettlementEvent};
pub use promise::Promise;
pub use readiness::{AuditFinding, Binding, Readiness};
pub use resolver::Resolver;
pub use settlement::{Outcome, Payload};
pub use signal::WaitableEvent;
