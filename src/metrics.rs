//! Operator metrics
//!
//! Counters for reconciliation outcomes and duration histograms around the
//! batch and, optionally, around every external call.

use metrics::{counter, histogram, Counter, Histogram};
use std::time::Duration;

/// Holder for the controller's metric handles.
#[derive(Clone)]
pub struct OperatorMetrics {
    reconciliations: Counter,
    successful_reconciliations: Counter,
    failed_reconciliations: Counter,
    reconciliation_duration: Histogram,
    enable_additional_metrics: bool,
}

impl OperatorMetrics {
    pub fn new(enable_additional_metrics: bool) -> Self {
        Self {
            reconciliations: counter!("topic_operator_reconciliations_total"),
            successful_reconciliations: counter!("topic_operator_successful_reconciliations_total"),
            failed_reconciliations: counter!("topic_operator_failed_reconciliations_total"),
            reconciliation_duration: histogram!("topic_operator_reconciliation_duration_seconds"),
            enable_additional_metrics,
        }
    }

    /// Count `count` reconciliation attempts.
    pub fn reconciliations(&self, count: u64) {
        self.reconciliations.increment(count);
    }

    pub fn successful_reconciliation(&self) {
        self.successful_reconciliations.increment(1);
    }

    pub fn failed_reconciliation(&self) {
        self.failed_reconciliations.increment(1);
    }

    pub fn record_reconciliation_duration(&self, duration: Duration) {
        self.reconciliation_duration.record(duration.as_secs_f64());
    }

    /// Duration of one admin/store/rebalancer call, recorded only when the
    /// additional-metrics knob is on.
    pub fn record_external_request(&self, operation: &'static str, duration: Duration) {
        if self.enable_additional_metrics {
            histogram!(
                "topic_operator_external_request_duration_seconds",
                "operation" => operation
            )
            .record(duration.as_secs_f64());
        }
    }
}

impl Default for OperatorMetrics {
    fn default() -> Self {
        Self::new(false)
    }
}
