//! Executor capability declarations.
//!
//! An executor declares which settlement kinds it can produce, how it wants
//! prerequisite payloads handed over, and which prerequisites it waits for.

use crate::state::SettlementKind;
use serde::{Deserialize, Serialize};

/// Settlement kinds a promise is allowed to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capabilities {
    /// May settle with a value
    pub can_resolve: bool,
    /// May settle with an error
    pub can_reject: bool,
}

impl Capabilities {
    /// Both resolution and rejection are allowed
    #[must_use]
    pub const fn both() -> Self {
        Self {
            can_resolve: true,
            can_reject: true,
        }
    }

    /// Only resolution is allowed
    #[must_use]
    pub const fn resolve_only() -> Self {
        Self {
            can_resolve: true,
            can_reject: false,
        }
    }

    /// Only rejection is allowed
    #[must_use]
    pub const fn reject_only() -> Self {
        Self {
            can_resolve: false,
            can_reject: true,
        }
    }

    /// Neither kind is allowed; the promise can only be cancelled
    #[must_use]
    pub const fn none() -> Self {
        Self {
            can_resolve: false,
            can_reject: false,
        }
    }

    /// Check if a settlement kind is allowed
    #[must_use]
    pub const fn allows(&self, kind: SettlementKind) -> bool {
        match kind {
            SettlementKind::Resolved => self.can_resolve,
            SettlementKind::Rejected => self.can_reject,
        }
    }

    /// Union of two declarations
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self {
            can_resolve: self.can_resolve || other.can_resolve,
            can_reject: self.can_reject || other.can_reject,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::both()
    }
}

impl std::fmt::Display for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.can_resolve, self.can_reject) {
            (true, true) => write!(f, "resolve|reject"),
            (true, false) => write!(f, "resolve"),
            (false, true) => write!(f, "reject"),
            (false, false) => write!(f, "cancel-only"),
        }
    }
}

/// Which prerequisites must settle before an executor runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrerequisitePolicy {
    /// Manual promise, settled from outside and never executed
    None,
    /// Ready once any prerequisite resolves or rejects
    AnyOne,
    /// Ready once every prerequisite resolves; rejects on the first rejection
    AllPrerequisites,
}

impl PrerequisitePolicy {
    /// Whether promises with this policy are executed by the engine
    #[must_use]
    pub const fn is_automatic(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// How a settled payload is handed to a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentPassing {
    /// The consumer receives a clone; any number of consumers
    #[default]
    ByCopy,
    /// The consumer takes the payload; it must be the only consumer
    ByMove,
}

impl ArgumentPassing {
    /// Whether this mode requires an exclusive consumer
    #[must_use]
    pub const fn is_exclusive(self) -> bool {
        matches!(self, Self::ByMove)
    }
}

/// Whether a rejection nobody reads is a defect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectPolicy {
    /// Report the rejection if the promise is dropped without it being read
    #[default]
    MustCatchRejection,
    /// Silently drop unread rejections
    CanIgnoreRejection,
}
