//! Metrics sink injected into the monitor, executor and pipeline.
//!
//! Components hold an `Option<Arc<dyn MetricsSink>>`; when absent nothing is
//! recorded. [`RecorderSink`] forwards to whatever `metrics` recorder the
//! process installed.

use std::sync::Arc;

use metrics::{counter, histogram};

pub const SIGNALS_DETECTED: &str = "mirror_signals_detected_total";
pub const DUPLICATES_SKIPPED: &str = "mirror_duplicates_skipped_total";
pub const FEED_FAILURES: &str = "mirror_feed_failures_total";
pub const CONSUMER_FAILURES: &str = "mirror_consumer_failures_total";
pub const ORDERS_SUBMITTED: &str = "mirror_orders_submitted_total";
pub const ORDERS_REJECTED: &str = "mirror_orders_rejected_total";
pub const EXECUTIONS_FAILED: &str = "mirror_executions_failed_total";
pub const FILLED_USD: &str = "mirror_filled_usd";
pub const TICK_SECONDS: &str = "mirror_tick_seconds";

pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &'static str, value: u64);

    fn observe(&self, name: &'static str, value: f64);
}

pub type SharedMetrics = Option<Arc<dyn MetricsSink>>;

/// Sink backed by the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderSink;

impl MetricsSink for RecorderSink {
    fn increment(&self, name: &'static str, value: u64) {
        counter!(name).increment(value);
    }

    fn observe(&self, name: &'static str, value: f64) {
        histogram!(name).record(value);
    }
}

pub(crate) fn incr(sink: &SharedMetrics, name: &'static str) {
    if let Some(sink) = sink {
        sink.increment(name, 1);
    }
}

pub(crate) fn observe(sink: &SharedMetrics, name: &'static str, value: f64) {
    if let Some(sink) = sink {
        sink.observe(name, value);
    }
}
