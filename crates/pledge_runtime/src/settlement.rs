//! Settlement values and the atomic state cell of a promise.

use pledge_core::{SettlementKind, SettlementState};
use std::sync::atomic::{AtomicU8, Ordering};

/// Bounds every payload carried through a promise graph must satisfy
///
/// `Clone` backs by-copy argument passing; by-move consumers take the
/// payload without cloning it.
pub trait Payload: Clone + Send + 'static {}

impl<P: Clone + Send + 'static> Payload for P {}

/// Final result of a promise
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// Settled with a value
    Resolved(T),
    /// Settled with an error
    Rejected(E),
    /// Settled without a payload
    Cancelled,
}

impl<T, E> Outcome<T, E> {
    /// State reached by this outcome
    #[must_use]
    pub const fn state(&self) -> SettlementState {
        match self {
            Self::Resolved(_) => SettlementState::Resolved,
            Self::Rejected(_) => SettlementState::Rejected,
            Self::Cancelled => SettlementState::Cancelled,
        }
    }

    /// Payload-carrying kind, if any
    #[must_use]
    pub const fn kind(&self) -> Option<SettlementKind> {
        match self {
            Self::Resolved(_) => Some(SettlementKind::Resolved),
            Self::Rejected(_) => Some(SettlementKind::Rejected),
            Self::Cancelled => None,
        }
    }

    /// Convert into a result; `None` for cancellation
    pub fn into_result(self) -> Option<Result<T, E>> {
        match self {
            Self::Resolved(value) => Some(Ok(value)),
            Self::Rejected(error) => Some(Err(error)),
            Self::Cancelled => None,
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Resolved(value),
            Err(error) => Self::Rejected(error),
        }
    }
}

/// Payload slot of a promise node
///
/// Written once when the node settles. A by-move hand-off leaves `Moved`
/// behind; the node's state stays what it was.
#[derive(Debug)]
pub(crate) enum SettlementValue<T, E> {
    Unsettled,
    Resolved(T),
    Rejected(E),
    Moved,
}

impl<T: Clone, E: Clone> SettlementValue<T, E> {
    /// Clone the payload out
    pub(crate) fn copy(&self) -> Option<Result<T, E>> {
        match self {
            Self::Resolved(value) => Some(Ok(value.clone())),
            Self::Rejected(error) => Some(Err(error.clone())),
            Self::Unsettled | Self::Moved => None,
        }
    }
}

impl<T, E> SettlementValue<T, E> {
    /// Move the payload out, leaving `Moved`
    pub(crate) fn take(&mut self) -> Option<Result<T, E>> {
        match std::mem::replace(self, Self::Moved) {
            Self::Resolved(value) => Some(Ok(value)),
            Self::Rejected(error) => Some(Err(error)),
            other => {
                *self = other;
                None
            }
        }
    }

    /// Kind of payload currently held
    pub(crate) const fn kind(&self) -> Option<SettlementKind> {
        match self {
            Self::Resolved(_) => Some(SettlementKind::Resolved),
            Self::Rejected(_) => Some(SettlementKind::Rejected),
            Self::Unsettled | Self::Moved => None,
        }
    }

    pub(crate) const fn is_moved(&self) -> bool {
        matches!(self, Self::Moved)
    }
}

impl<T, E> From<Outcome<T, E>> for SettlementValue<T, E> {
    fn from(outcome: Outcome<T, E>) -> Self {
        match outcome {
            Outcome::Resolved(value) => Self::Resolved(value),
            Outcome::Rejected(error) => Self::Rejected(error),
            Outcome::Cancelled => Self::Unsettled,
        }
    }
}

const PENDING: u8 = 0;
// Won the transition, payload not yet published.
const SETTLING: u8 = 1;
const RESOLVED: u8 = 2;
const REJECTED: u8 = 3;
const CANCELLED: u8 = 4;

/// Atomic settlement state
///
/// `try_begin` is the single serialization point of a node: exactly one
/// caller moves it out of pending. Readers see `Pending` until the winner
/// publishes the final state, so a published state always has its payload
/// in place.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(PENDING))
    }

    pub(crate) fn load(&self) -> SettlementState {
        match self.0.load(Ordering::Acquire) {
            RESOLVED => SettlementState::Resolved,
            REJECTED => SettlementState::Rejected,
            CANCELLED => SettlementState::Cancelled,
            _ => SettlementState::Pending,
        }
    }

    /// Whether no settlement has started; `SETTLING` counts as closed
    pub(crate) fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire) == PENDING
    }

    /// Claim the pending -> settled transition
    pub(crate) fn try_begin(&self) -> bool {
        self.0
            .compare_exchange(PENDING, SETTLING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Publish the final state; only the caller that won `try_begin` may call this
    pub(crate) fn publish(&self, state: SettlementState) {
        let raw = match state {
            SettlementState::Resolved => RESOLVED,
            SettlementState::Rejected => REJECTED,
            SettlementState::Cancelled => CANCELLED,
            SettlementState::Pending => PENDING,
        };
        debug_assert_eq!(self.0.load(Ordering::Acquire), SETTLING);
        self.0.store(raw, Ordering::Release);
    }
}
