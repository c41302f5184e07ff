//! Combinators built from the executor interface.
//!
//! Each adapter is an ordinary derived promise whose executor wraps a
//! closure, so adapters obey the same readiness, capability and
//! propagation rules as hand-written executors.

use crate::engine::{Engine, NodeOptions};
use crate::executor::{Arguments, FnExecutor};
use crate::promise::Promise;
use crate::resolver::Resolver;
use crate::settlement::{Outcome, Payload};
use futures::channel::oneshot;
use pledge_core::{Capabilities, PrerequisitePolicy, PromiseResult, RejectPolicy};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

impl<T: Payload, E: Payload> Engine<T, E> {
    /// Map the value of `prerequisite`; rejections pass through untouched
    ///
    /// # Errors
    ///
    /// Same as [`Engine::derive`].
    #[track_caller]
    pub fn then<F>(&self, prerequisite: &Promise<T, E>, f: F) -> PromiseResult<Promise<T, E>>
    where
        F: FnOnce(T) -> Result<T, E> + Send + 'static,
    {
        self.derive(
            FnExecutor::new(
                PrerequisitePolicy::AllPrerequisites,
                move |args: Arguments<T, E>, resolver: &Resolver<T, E>| {
                    if let Some(value) = args.into_values().pop() {
                        let mapped = f(value)?;
                        resolver.resolve(mapped).ok();
                    }
                    Ok(())
                },
            ),
            &[prerequisite],
        )
    }

    /// Recover from a rejection of `prerequisite`; values pass through
    ///
    /// # Errors
    ///
    /// Same as [`Engine::derive`].
    #[track_caller]
    pub fn catch<F>(&self, prerequisite: &Promise<T, E>, f: F) -> PromiseResult<Promise<T, E>>
    where
        F: FnOnce(E) -> Result<T, E> + Send + 'static,
    {
        self.derive(
            FnExecutor::new(
                PrerequisitePolicy::AnyOne,
                move |args: Arguments<T, E>, resolver: &Resolver<T, E>| {
                    let value = match args.into_outcome() {
                        Some(Ok(value)) => value,
                        Some(Err(error)) => f(error)?,
                        None => return Ok(()),
                    };
                    resolver.resolve(value).ok();
                    Ok(())
                },
            ),
            &[prerequisite],
        )
    }

    /// Run `f` on the result of `prerequisite` whether it resolved or rejected
    ///
    /// The promise settles with whatever `f` returns. A cancelled
    /// prerequisite cancels it without calling `f`.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::derive`].
    #[track_caller]
    pub fn finally<F>(&self, prerequisite: &Promise<T, E>, f: F) -> PromiseResult<Promise<T, E>>
    where
        F: FnOnce(Result<T, E>) -> Result<T, E> + Send + 'static,
    {
        self.derive(
            FnExecutor::new(
                PrerequisitePolicy::AnyOne,
                move |args: Arguments<T, E>, resolver: &Resolver<T, E>| {
                    if let Some(outcome) = args.into_outcome() {
                        resolver.settle(f(outcome)).ok();
                    }
                    Ok(())
                },
            ),
            &[prerequisite],
        )
    }

    /// Combine the values of every prerequisite, in list order
    ///
    /// # Errors
    ///
    /// Same as [`Engine::derive`].
    #[track_caller]
    pub fn all<F>(&self, prerequisites: &[&Promise<T, E>], f: F) -> PromiseResult<Promise<T, E>>
    where
        F: FnOnce(Vec<T>) -> Result<T, E> + Send + 'static,
    {
        self.derive(
            FnExecutor::new(
                PrerequisitePolicy::AllPrerequisites,
                move |args: Arguments<T, E>, resolver: &Resolver<T, E>| {
                    let combined = f(args.into_values())?;
                    resolver.resolve(combined).ok();
                    Ok(())
                },
            ),
            prerequisites,
        )
    }

    /// Settle like the first prerequisite to resolve or reject
    ///
    /// # Errors
    ///
    /// Same as [`Engine::derive`].
    #[track_caller]
    pub fn race(&self, prerequisites: &[&Promise<T, E>]) -> PromiseResult<Promise<T, E>> {
        self.derive(
            FnExecutor::new(
                PrerequisitePolicy::AnyOne,
                |args: Arguments<T, E>, resolver: &Resolver<T, E>| {
                    if let Some(outcome) = args.into_outcome() {
                        resolver.settle(outcome).ok();
                    }
                    Ok(())
                },
            ),
            prerequisites,
        )
    }

    /// Promise already resolved with `value`
    #[must_use]
    #[track_caller]
    pub fn resolved(&self, value: T) -> Promise<T, E> {
        let promise = self.manual(Capabilities::resolve_only());
        // A fresh promise cannot already be settled.
        let _ = promise.resolve(value);
        promise
    }

    /// Promise already rejected with `error`
    #[must_use]
    #[track_caller]
    pub fn rejected(&self, error: E) -> Promise<T, E> {
        let promise = self.manual(Capabilities::reject_only());
        let _ = promise.reject(error);
        promise
    }

    /// Future completing with the outcome of `promise`
    ///
    /// Reading a rejection through the future counts as observing it.
    ///
    /// # Errors
    ///
    /// `ExclusiveArgument` if `promise` is consumed by move,
    /// `ValueConsumed` if its payload is already gone.
    #[track_caller]
    pub fn when_settled(&self, promise: &Promise<T, E>) -> PromiseResult<SettledFuture<T, E>> {
        let (sender, receiver) = oneshot::channel();
        let watcher = self.derive_with(
            FnExecutor::new(
                PrerequisitePolicy::AnyOne,
                move |args: Arguments<T, E>, resolver: &Resolver<T, E>| {
                    if let Some(outcome) = args.into_outcome() {
                        let _ = sender.send(outcome.clone());
                        resolver.settle(outcome).ok();
                    }
                    Ok(())
                },
            ),
            &[promise],
            NodeOptions::default().with_reject_policy(RejectPolicy::CanIgnoreRejection),
        )?;
        Ok(SettledFuture {
            receiver,
            watcher,
        })
    }
}

/// Future returned by [`Engine::when_settled`]
///
/// Resolves to `Outcome::Cancelled` when the watched promise is cancelled.
#[must_use = "futures do nothing unless polled"]
pub struct SettledFuture<T: Payload, E: Payload> {
    receiver: oneshot::Receiver<Result<T, E>>,
    watcher: Promise<T, E>,
}

impl<T: Payload, E: Payload> Future for SettledFuture<T, E> {
    type Output = Outcome<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result.into()),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Outcome::Cancelled),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: Payload, E: Payload> std::fmt::Debug for SettledFuture<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettledFuture")
            .field("watcher", &self.watcher.id())
            .finish()
    }
}
