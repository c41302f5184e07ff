//! Application lifecycle driver.
//!
//! Observers are owned by the application and notified outside its state
//! lock, so a callback may query the application or request another
//! transition.

use crate::error::{LifecycleError, LifecycleResult};
use crate::state::ApplicationState;
use pledge_core::{sync::lock, ObserverId, ObserverList};
use pledge_runtime::WaitableEvent;
use std::sync::Mutex;
use std::time::Duration;

/// Lifecycle state machine with state and focus notifications
#[derive(Debug, Default)]
pub struct Application {
    state: Mutex<ApplicationState>,
    state_observers: ObserverList<ApplicationState>,
    focus_observers: ObserverList<bool>,
    loaded: WaitableEvent,
}

impl Application {
    /// Create an application in `Preloading`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ApplicationState {
        *lock(&self.state)
    }

    /// Whether the application has focus
    #[must_use]
    pub fn has_focus(&self) -> bool {
        self.state().has_focus()
    }

    /// Move to `next`
    ///
    /// Returns `Ok(false)` when `next` is the current state; nothing is
    /// notified then.
    ///
    /// Observers run after the state lock is released. A transition made
    /// from inside an observer is notified before the outer notification
    /// finishes, and transitions racing on different threads may be
    /// notified in a different order than they were applied. Observers
    /// that need the settled order should read [`Application::state`].
    ///
    /// # Errors
    ///
    /// `Stopped` once the application stopped, `InvalidTransition` for
    /// transitions outside the table.
    pub fn set_state(&self, next: ApplicationState) -> LifecycleResult<bool> {
        let previous = {
            let mut state = lock(&self.state);
            let previous = *state;
            if previous == next {
                tracing::warn!(state = %previous, "attempt to re-enter current lifecycle state");
                return Ok(false);
            }
            if previous == ApplicationState::Stopped {
                return Err(LifecycleError::Stopped { to: next });
            }
            if !previous.can_transition_to(next) {
                return Err(LifecycleError::InvalidTransition {
                    from: previous,
                    to: next,
                });
            }
            *state = next;
            previous
        };

        tracing::info!(from = %previous, to = %next, "lifecycle transition");
        self.state_observers.notify(&next);
        if previous.has_focus() != next.has_focus() {
            self.focus_observers.notify(&next.has_focus());
        }
        Ok(true)
    }

    /// Check the application is still preloading
    ///
    /// # Errors
    ///
    /// `UnexpectedState` in any other state.
    pub fn initialize(&self) -> LifecycleResult<()> {
        self.expect_state(ApplicationState::Preloading)
    }

    /// Start after preloading
    ///
    /// # Errors
    ///
    /// `UnexpectedState` unless the application is preloading.
    pub fn start(&self) -> LifecycleResult<()> {
        self.expect_state(ApplicationState::Preloading)?;
        self.set_state(ApplicationState::Started).map(drop)
    }

    /// Lose focus
    ///
    /// # Errors
    ///
    /// Same as [`Application::set_state`].
    pub fn pause(&self) -> LifecycleResult<()> {
        self.set_state(ApplicationState::Paused).map(drop)
    }

    /// Return to `Started`, leaving `Suspended` through `Paused`
    ///
    /// # Errors
    ///
    /// Same as [`Application::set_state`].
    pub fn resume(&self) -> LifecycleResult<()> {
        if self.state() == ApplicationState::Suspended {
            self.set_state(ApplicationState::Paused)?;
        }
        self.set_state(ApplicationState::Started).map(drop)
    }

    /// Pause if needed, enter `Suspended`, and reset the loaded signal
    ///
    /// # Errors
    ///
    /// Same as [`Application::set_state`].
    pub fn suspend(&self) -> LifecycleResult<()> {
        if self.state() != ApplicationState::Paused {
            self.set_state(ApplicationState::Paused)?;
        }
        self.set_state(ApplicationState::Suspended)?;
        self.loaded.reset();
        Ok(())
    }

    /// Stop the application
    ///
    /// # Errors
    ///
    /// Never fails from a running state; stopping twice is a no-op.
    pub fn teardown(&self) -> LifecycleResult<()> {
        self.set_state(ApplicationState::Stopped).map(drop)
    }

    /// Register a state observer
    pub fn on_state_change<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ApplicationState) + Send + Sync + 'static,
    {
        self.state_observers.add(observer)
    }

    /// Register a focus observer
    pub fn on_focus_change<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.focus_observers.add(observer)
    }

    /// Remove a state or focus observer; returns whether it was registered
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.state_observers.remove(id) || self.focus_observers.remove(id)
    }

    /// Signal that resources finished loading
    pub fn signal_loaded(&self) {
        tracing::debug!("application resources loaded");
        self.loaded.signal();
    }

    /// Wait for the loaded signal; returns whether it arrived in time
    pub fn wait_loaded(&self, timeout: Duration) -> bool {
        self.loaded.wait_timeout(timeout)
    }

    /// Whether the loaded signal is set
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.is_signaled()
    }

    fn expect_state(&self, expected: ApplicationState) -> LifecycleResult<()> {
        let actual = self.state();
        if actual == expected {
            Ok(())
        } else {
            Err(LifecycleError::UnexpectedState { expected, actual })
        }
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        let state = *self.state.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state != ApplicationState::Stopped {
            tracing::warn!(%state, "application dropped without teardown");
        }
    }
}
