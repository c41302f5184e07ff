//! Callback registry scoped to its owner.
//!
//! Replaces broadcast-style global notification: whoever owns the list owns
//! the observers, and they go away with it.

use crate::id::ObserverId;
use crate::sync::lock;
use std::sync::{Arc, Mutex};

type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Thread-safe list of callbacks notified with a value of type `A`
pub struct ObserverList<A> {
    observers: Mutex<Vec<(ObserverId, Callback<A>)>>,
}

impl<A> ObserverList<A> {
    /// Create an empty list
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback
    pub fn add<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let id = ObserverId::new();
        lock(&self.observers).push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback; returns whether it was registered
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut observers = lock(&self.observers);
        let before = observers.len();
        observers.retain(|(observer, _)| *observer != id);
        observers.len() != before
    }

    /// Call every registered callback in registration order
    ///
    /// Callbacks run outside the list's lock, so they may add or remove
    /// observers. Changes take effect from the next notification.
    pub fn notify(&self, value: &A) {
        let snapshot: Vec<Callback<A>> = lock(&self.observers)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in snapshot {
            callback(value);
        }
    }

    /// Number of registered callbacks
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.observers).len()
    }

    /// Check if no callbacks are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A> Default for ObserverList<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> std::fmt::Debug for ObserverList<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("observers", &self.len())
            .finish()
    }
}
