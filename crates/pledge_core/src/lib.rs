//! PLEDGE Core Types
//!
//! Pure types shared by the promise engine and its consumers: identifiers,
//! settlement states, executor capability declarations, errors, logical time
//! and a scoped callback registry.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capability;
pub mod error;
pub mod id;
pub mod observer;
pub mod origin;
pub mod state;
pub mod sync;
pub mod time;

// Re-exports
pub use capability::{ArgumentPassing, Capabilities, PrerequisitePolicy, RejectPolicy};
pub use error::{PromiseError, PromiseResult};
pub use id::{ObserverId, PromiseId};
pub use observer::ObserverList;
pub use origin::Origin;
pub use state::{SettlementKind, SettlementState};
pub use time::{LogicalClock, LogicalTime};
