//! Metrics collection for pipeline monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Engine metrics.
pub struct EngineMetrics {
    /// Quotes issued.
    pub quotes_issued: AtomicU64,
    /// Conversions committed.
    pub conversions_committed: AtomicU64,
    /// Provider events applied.
    pub events_applied: AtomicU64,
    /// Duplicate deliveries suppressed.
    pub events_duplicate: AtomicU64,
    /// Events rejected as invalid transitions.
    pub events_rejected: AtomicU64,
    /// Settlements recorded.
    pub settlements_recorded: AtomicU64,
    /// Settlements aborted by an invariant violation.
    pub settlements_failed: AtomicU64,
    /// Refund reversals recorded.
    pub refunds_recorded: AtomicU64,
}

impl EngineMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            quotes_issued: AtomicU64::new(0),
            conversions_committed: AtomicU64::new(0),
            events_applied: AtomicU64::new(0),
            events_duplicate: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            settlements_recorded: AtomicU64::new(0),
            settlements_failed: AtomicU64::new(0),
            refunds_recorded: AtomicU64::new(0),
        }
    }

    /// Record an issued quote.
    pub fn quote_issued(&self) {
        self.quotes_issued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed conversion.
    pub fn conversion_committed(&self) {
        self.conversions_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an applied event.
    pub fn event_applied(&self) {
        self.events_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a suppressed duplicate delivery.
    pub fn event_duplicate(&self) {
        self.events_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected event.
    pub fn event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a settlement.
    pub fn settlement_recorded(&self) {
        self.settlements_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an aborted settlement.
    pub fn settlement_failed(&self) {
        self.settlements_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a refund reversal.
    pub fn refund_recorded(&self) {
        self.refunds_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            quotes_issued: self.quotes_issued.load(Ordering::Relaxed),
            conversions_committed: self.conversions_committed.load(Ordering::Relaxed),
            events_applied: self.events_applied.load(Ordering::Relaxed),
            events_duplicate: self.events_duplicate.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            settlements_recorded: self.settlements_recorded.load(Ordering::Relaxed),
            settlements_failed: self.settlements_failed.load(Ordering::Relaxed),
            refunds_recorded: self.refunds_recorded.load(Ordering::Relaxed),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub quotes_issued: u64,
    pub conversions_committed: u64,
    pub events_applied: u64,
    pub events_duplicate: u64,
    pub events_rejected: u64,
    pub settlements_recorded: u64,
    pub settlements_failed: u64,
    pub refunds_recorded: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<EngineMetrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = EngineMetrics::new();

        metrics.quote_issued();
        metrics.conversion_committed();
        metrics.event_applied();
        metrics.event_applied();
        metrics.event_duplicate();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.quotes_issued, 1);
        assert_eq!(snapshot.events_applied, 2);
        assert_eq!(snapshot.events_duplicate, 1);
        assert_eq!(snapshot.settlements_recorded, 0);
    }
}
