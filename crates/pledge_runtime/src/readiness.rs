//! Readiness evaluation for promise nodes.
//!
//! The evaluator is a pure function of a node's prerequisite policy and the
//! current states of its prerequisites, scanned in list order:
//! - Prerequisite list order is the only tie-break
//! - Every evaluation re-scans the full list, never just the prerequisite
//!   that triggered it
//! - States are monotonic, so once a node is ready it stays ready

use crate::executor::ExecutorDescriptor;
use pledge_core::{Capabilities, PrerequisitePolicy, SettlementState};

/// Which prerequisites feed the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// The prerequisite at this index (AnyOne)
    Single(usize),
    /// Every prerequisite, in list order (AllPrerequisites)
    All,
}

/// Result of evaluating a node against its prerequisites
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Not ready yet, or never automatically ready
    Waiting,
    /// Run the executor with this binding
    Execute(Binding),
    /// Reject with the rejection of the prerequisite at this index
    Reject {
        /// Lowest rejected prerequisite
        index: usize,
    },
    /// Cancel without running the executor
    Cancel,
}

/// Evaluate a prerequisite policy against prerequisite states
#[must_use]
pub fn evaluate(policy: PrerequisitePolicy, states: &[SettlementState]) -> Readiness {
    match policy {
        PrerequisitePolicy::None => Readiness::Waiting,
        PrerequisitePolicy::AnyOne => {
            if let Some(index) = states.iter().position(|s| s.has_payload()) {
                Readiness::Execute(Binding::Single(index))
            } else if !states.is_empty()
                && states.iter().all(|s| *s == SettlementState::Cancelled)
            {
                Readiness::Cancel
            } else {
                Readiness::Waiting
            }
        }
        PrerequisitePolicy::AllPrerequisites => {
            if let Some(index) = states
                .iter()
                .position(|s| *s == SettlementState::Rejected)
            {
                Readiness::Reject { index }
            } else if states.contains(&SettlementState::Cancelled) {
                Readiness::Cancel
            } else if states.iter().all(|s| *s == SettlementState::Resolved) {
                Readiness::Execute(Binding::All)
            } else {
                Readiness::Waiting
            }
        }
    }
}

/// Settlement kinds a derived node can end up with
///
/// An AllPrerequisites node also inherits rejection from any prerequisite
/// that can reject, since that rejection is forwarded without running the
/// executor.
#[must_use]
pub fn effective_capabilities(
    descriptor: &ExecutorDescriptor,
    prerequisites: &[Capabilities],
) -> Capabilities {
    match descriptor.policy {
        PrerequisitePolicy::AllPrerequisites if prerequisites.iter().any(|c| c.can_reject) => {
            descriptor.capabilities.union(Capabilities::reject_only())
        }
        _ => descriptor.capabilities,
    }
}

/// Problem found when auditing a derived node against its prerequisites
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditFinding {
    /// An AllPrerequisites executor waits on a prerequisite that cannot resolve
    PrerequisiteNeverResolves {
        /// Index of the prerequisite
        index: usize,
    },
    /// An AnyOne executor waits on prerequisites that can only be cancelled
    NoPrerequisiteSettles,
}

impl std::fmt::Display for AuditFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PrerequisiteNeverResolves { index } => {
                write!(f, "prerequisite {} cannot resolve; executor never runs", index)
            }
            Self::NoPrerequisiteSettles => {
                write!(f, "no prerequisite can resolve or reject; executor never runs")
            }
        }
    }
}

/// Check that a derived node's executor can actually be reached
#[must_use]
pub fn audit(descriptor: &ExecutorDescriptor, prerequisites: &[Capabilities]) -> Vec<AuditFinding> {
    match descriptor.policy {
        PrerequisitePolicy::None => Vec::new(),
        PrerequisitePolicy::AnyOne => {
            if prerequisites.iter().all(|c| !c.can_resolve && !c.can_reject) {
                vec![AuditFinding::NoPrerequisiteSettles]
            } else {
                Vec::new()
            }
        }
        PrerequisitePolicy::AllPrerequisites => prerequisites
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.can_resolve)
            .map(|(index, _)| AuditFinding::PrerequisiteNeverResolves { index })
            .collect(),
    }
}
