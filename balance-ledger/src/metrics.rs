//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring ledger operations.
//!
//! # Metrics
//!
//! - `ledger_operations_total{operation, outcome}` - Operations by result
//!   (`ok`, `declined`, `invalid_argument`, `store_unavailable`, ...)
//! - `ledger_operation_duration_seconds{operation}` - Latency of dispatched operations
//! - `ledger_takes_declined_total` - Takes refused for insufficient balance

use crate::error::Error;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};
use std::sync::Arc;
use std::time::Duration;

/// Metrics collector
///
/// Collectors are registered on a private registry so several ledgers can
/// coexist in one process.
#[derive(Clone)]
pub struct Metrics {
    /// Operations by name and outcome
    pub operations_total: IntCounterVec,

    /// Operation duration histogram
    pub operation_duration: HistogramVec,

    /// Takes declined for insufficient balance
    pub takes_declined: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounterVec::new(
            Opts::new("ledger_operations_total", "Ledger operations by outcome"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "ledger_operation_duration_seconds",
                "Histogram of dispatched operation latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let takes_declined = IntCounter::new(
            "ledger_takes_declined_total",
            "Takes refused for insufficient balance",
        )?;
        registry.register(Box::new(takes_declined.clone()))?;

        Ok(Self {
            operations_total,
            operation_duration,
            takes_declined,
            registry,
        })
    }

    /// Record a completed operation
    pub fn record_success(&self, operation: &str, elapsed: Duration) {
        self.operations_total.with_label_values(&[operation, "ok"]).inc();
        self.duration(operation).observe(elapsed.as_secs_f64());
    }

    /// Record a take refused for insufficient balance
    pub fn record_declined(&self, elapsed: Duration) {
        self.operations_total
            .with_label_values(&["take", "declined"])
            .inc();
        self.takes_declined.inc();
        self.duration("take").observe(elapsed.as_secs_f64());
    }

    /// Record a failed operation
    pub fn record_failure(&self, operation: &str, err: &Error) {
        self.operations_total
            .with_label_values(&[operation, err.kind()])
            .inc();
    }

    /// Count of operations with the given outcome
    pub fn operation_count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .get()
    }

    fn duration(&self, operation: &str) -> Histogram {
        self.operation_duration.with_label_values(&[operation])
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
