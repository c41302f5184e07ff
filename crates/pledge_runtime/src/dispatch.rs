//! Task runners that execute ready promise nodes.
//!
//! A runner decides where an executor runs: on the settling thread
//! (`InlineRunner`) or on a tokio runtime (`TokioRunner`). Engine-internal
//! propagation always goes through a per-thread trampoline, so a long chain
//! of inline settlements runs as a loop instead of a recursion.

use pledge_core::{PromiseError, PromiseResult};
use std::cell::RefCell;
use std::collections::VecDeque;

/// Unit of work posted to a runner
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Execution context for ready nodes
pub trait TaskRunner: Send + Sync {
    /// Run the task now or later; must run it exactly once
    fn post(&self, task: Task);

    /// Name used in logs
    fn name(&self) -> &'static str;
}

/// Runs tasks on the posting thread
///
/// Tasks posted while another inline task is running are queued and run in
/// FIFO order once it returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineRunner;

impl TaskRunner for InlineRunner {
    fn post(&self, task: Task) {
        run_inline(task);
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}

/// Runs tasks on a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioRunner {
    handle: tokio::runtime::Handle,
}

impl TokioRunner {
    /// Create a runner posting to the given runtime
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Create a runner posting to the runtime of the calling context
    ///
    /// # Errors
    ///
    /// Returns error when called outside a tokio runtime
    pub fn current() -> PromiseResult<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|err| PromiseError::Runtime {
                reason: err.to_string(),
            })
    }
}

impl TaskRunner for TokioRunner {
    fn post(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }

    fn name(&self) -> &'static str {
        "tokio"
    }
}

thread_local! {
    static TRAMPOLINE: RefCell<Option<VecDeque<Task>>> = const { RefCell::new(None) };
}

/// Resets the trampoline when the outermost drain ends, even by unwinding
///
/// Executor panics are caught by the node that ran them, so only a panic in
/// a settlement observer unwinds through here.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let _ = TRAMPOLINE.try_with(|queue| queue.borrow_mut().take());
    }
}

/// Run a task on this thread, queueing it if a drain is already in progress
pub(crate) fn run_inline(task: Task) {
    let first = TRAMPOLINE.with(|queue| {
        let mut queue = queue.borrow_mut();
        match queue.as_mut() {
            Some(pending) => {
                pending.push_back(task);
                None
            }
            None => {
                *queue = Some(VecDeque::new());
                Some(task)
            }
        }
    });

    let Some(first) = first else {
        return;
    };

    let _guard = DrainGuard;
    first();
    while let Some(next) =
        TRAMPOLINE.with(|queue| queue.borrow_mut().as_mut().and_then(VecDeque::pop_front))
    {
        next();
    }
}

/// Defer engine-internal work through the trampoline
pub(crate) fn defer<F>(work: F)
where
    F: FnOnce() + Send + 'static,
{
    run_inline(Box::new(work));
}
