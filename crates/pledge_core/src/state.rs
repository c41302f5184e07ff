//! Settlement states of a promise.
//!
//! A promise leaves `Pending` at most once and never changes its settled
//! state afterwards.

use serde::{Deserialize, Serialize};

/// Observable state of a promise node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementState {
    /// Not settled yet
    Pending,
    /// Settled with a value
    Resolved,
    /// Settled with an error
    Rejected,
    /// Settled without a payload
    Cancelled,
}

impl SettlementState {
    /// Whether the state is final
    #[must_use]
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether the state carries a payload
    #[must_use]
    pub const fn has_payload(self) -> bool {
        matches!(self, Self::Resolved | Self::Rejected)
    }
}

impl std::fmt::Display for SettlementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Payload-carrying settlement an executor may declare it produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    /// Settled with a value
    Resolved,
    /// Settled with an error
    Rejected,
}

impl SettlementKind {
    /// State reached by settling with this kind
    #[must_use]
    pub const fn state(self) -> SettlementState {
        match self {
            Self::Resolved => SettlementState::Resolved,
            Self::Rejected => SettlementState::Rejected,
        }
    }
}

impl std::fmt::Display for SettlementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.state().fmt(f)
    }
}
