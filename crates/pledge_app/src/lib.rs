//! PLEDGE Application Lifecycle
//!
//! Enumerated lifecycle state machine with a fixed transition table, state
//! and focus observers, and a "resources loaded" signal. It consumes the
//! engine's callback registry and waitable event and takes no part in the
//! promise graph itself.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod application;
pub mod error;
pub mod state;

pub use application::Application;
pub use error::{LifecycleError, LifecycleResult};
pub use state::ApplicationState;
