//! Engine monitor for metrics and diagnostics.
//!
//! Tracks settlement counters and keeps the reports of rejections that
//! were dropped without anyone observing them.

use pledge_core::{sync, LogicalTime, Origin, PromiseError, PromiseId, SettlementState};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Settlement notification delivered to engine observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementEvent {
    /// Settled promise
    pub promise: PromiseId,
    /// State it settled into
    pub state: SettlementState,
    /// Logical time of the settlement
    pub at: LogicalTime,
    /// Label given at construction
    pub label: Option<Arc<str>>,
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    /// Promises constructed
    pub promises_created: u64,
    /// Executors run
    pub executions: u64,
    /// Promises resolved
    pub resolved: u64,
    /// Promises rejected
    pub rejected: u64,
    /// Promises cancelled
    pub cancelled: u64,
    /// Rejections dropped without being observed
    pub unobserved_rejections: u64,
}

impl Metrics {
    /// Promises settled in any state
    #[must_use]
    pub const fn settled(&self) -> u64 {
        self.resolved + self.rejected + self.cancelled
    }

    /// Get success rate (0.0 - 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let settled = self.settled();
        if settled == 0 {
            return 1.0;
        }
        self.resolved as f64 / settled as f64
    }

    /// Get failure rate (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let settled = self.settled();
        if settled == 0 {
            return 0.0;
        }
        self.rejected as f64 / settled as f64
    }
}

/// Live engine counters
#[derive(Debug, Default)]
pub(crate) struct EngineMetrics {
    promises_created: AtomicU64,
    executions: AtomicU64,
    resolved: AtomicU64,
    rejected: AtomicU64,
    cancelled: AtomicU64,
    unobserved_rejections: AtomicU64,
}

impl EngineMetrics {
    pub(crate) fn record_created(&self) {
        self.promises_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_execution(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_settlement(&self, state: SettlementState) {
        let counter = match state {
            SettlementState::Resolved => &self.resolved,
            SettlementState::Rejected => &self.rejected,
            SettlementState::Cancelled => &self.cancelled,
            SettlementState::Pending => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unobserved(&self) {
        self.unobserved_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> Metrics {
        Metrics {
            promises_created: self.promises_created.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            unobserved_rejections: self.unobserved_rejections.load(Ordering::Relaxed),
        }
    }
}

/// A rejection nobody consumed before its promise was dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionReport {
    /// Dropped promise
    pub promise: PromiseId,
    /// Where it was constructed
    pub origin: Origin,
    /// Label given at construction
    pub label: Option<Arc<str>>,
    /// When it was rejected
    pub at: LogicalTime,
}

impl RejectionReport {
    /// The contract violation this report stands for
    #[must_use]
    pub fn to_error(&self) -> PromiseError {
        PromiseError::UnobservedRejection {
            id: self.promise,
            origin: self.origin,
        }
    }
}

/// Bounded store of rejection reports
#[derive(Debug)]
pub(crate) struct Diagnostics {
    reports: Mutex<VecDeque<RejectionReport>>,
    max_retained: usize,
}

impl Diagnostics {
    pub(crate) fn new(max_retained: usize) -> Self {
        Self {
            reports: Mutex::new(VecDeque::new()),
            max_retained,
        }
    }

    /// Keep a report, evicting the oldest past the retention cap
    pub(crate) fn record(&self, report: RejectionReport) {
        if self.max_retained == 0 {
            return;
        }
        let mut reports = sync::lock(&self.reports);
        if reports.len() == self.max_retained {
            reports.pop_front();
        }
        reports.push_back(report);
    }

    pub(crate) fn reports(&self) -> Vec<RejectionReport> {
        sync::lock(&self.reports).iter().cloned().collect()
    }

    pub(crate) fn drain(&self) -> Vec<RejectionReport> {
        sync::lock(&self.reports).drain(..).collect()
    }
}
