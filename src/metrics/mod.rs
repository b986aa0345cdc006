//! Prometheus metrics for the notification engine.
//!
//! This module provides metrics for monitoring deliveries:
//! - Send metrics (sent, failed by channel; template skips)
//! - Dispatch latency
//! - Scheduler metrics (processed rows by outcome, sweep duration)

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "atelier";

lazy_static! {
    // ============================================================================
    // Send Metrics
    // ============================================================================

    /// Successful sends by channel
    pub static ref NOTIFICATIONS_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_notifications_sent_total", METRIC_PREFIX),
        "Total notifications successfully handed to a provider",
        &["channel"]
    ).unwrap();

    /// Failed send attempts by channel
    pub static ref NOTIFICATIONS_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_notifications_failed_total", METRIC_PREFIX),
        "Total notification send attempts that failed",
        &["channel"]
    ).unwrap();

    /// Channel attempts skipped because no usable template existed
    pub static ref NOTIFICATIONS_SKIPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_skipped_total", METRIC_PREFIX),
        "Total channel attempts skipped for lack of an enabled template"
    ).unwrap();

    /// End-to-end dispatch latency by delivery mode
    pub static ref DISPATCH_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_dispatch_latency_seconds", METRIC_PREFIX),
        "Dispatch latency in seconds (settings load through logging)",
        &["mode"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // ============================================================================
    // Scheduler Metrics
    // ============================================================================

    /// Scheduled rows processed by outcome
    pub static ref SCHEDULED_PROCESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_scheduled_processed_total", METRIC_PREFIX),
        "Total scheduled notifications processed",
        &["outcome"]
    ).unwrap();

    /// Scheduled rows inserted
    pub static ref SCHEDULED_CREATED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_scheduled_created_total", METRIC_PREFIX),
        "Total scheduled notifications created"
    ).unwrap();

    /// Duration of one due-notification sweep
    pub static ref SCHEDULER_SWEEP_DURATION: Histogram = register_histogram!(
        format!("{}_scheduler_sweep_duration_seconds", METRIC_PREFIX),
        "Duration of one scheduler sweep in seconds",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]
    ).unwrap();
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
