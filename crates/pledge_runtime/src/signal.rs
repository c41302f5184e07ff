//! Manual-reset event with blocking waits.
//!
//! The only primitive in the crate that blocks a thread. Promise
//! propagation never waits on it.

use pledge_core::sync::lock;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Event that stays signaled until reset
#[derive(Debug, Default)]
pub struct WaitableEvent {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl WaitableEvent {
    /// Create an unsignaled event
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the event and wake every waiter
    pub fn signal(&self) {
        *lock(&self.signaled) = true;
        self.condvar.notify_all();
    }

    /// Return the event to the unsignaled state
    pub fn reset(&self) {
        *lock(&self.signaled) = false;
    }

    /// Whether the event is signaled
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        *lock(&self.signaled)
    }

    /// Block until signaled or until `timeout` elapses
    ///
    /// Returns whether the event was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = lock(&self.signaled);
        while !*signaled {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            signaled = self
                .condvar
                .wait_timeout(signaled, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Block until signaled
    pub fn wait(&self) {
        let mut signaled = lock(&self.signaled);
        while !*signaled {
            signaled = self
                .condvar
                .wait(signaled)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
