//! Opt-in telemetry via metrics-rs.
//!
//! Emission is gated by a process-wide flag and off by default; with no
//! recorder installed the macros are no-ops anyway, so the hot path stays
//! cheap either way. Exporters (prometheus, statsd, ...) are the caller's
//! business.

use crate::pad::PadRef;
use metrics::Unit;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether telemetry events are emitted.
static TELEMETRY_ENABLED: AtomicBool = AtomicBool::new(false);

/// Whether metric descriptions have been registered.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const ELEMENTS_INITIALIZED: &str = "weir_elements_initialized";
const ELEMENTS_TERMINATED: &str = "weir_elements_terminated";
const LINKS_CREATED: &str = "weir_links_created";
const QUEUE_SIZE: &str = "weir_queue_size";
const METRIC_VALUE: &str = "weir_metric_value";

/// Turn telemetry emission on or off for the whole process.
pub fn set_telemetry_enabled(enabled: bool) {
    TELEMETRY_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Whether telemetry emission is currently enabled.
pub fn telemetry_enabled() -> bool {
    TELEMETRY_ENABLED.load(Ordering::Relaxed)
}

/// Register metric descriptions.
///
/// Call once at startup, before installing an exporter. Safe to call
/// multiple times.
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    metrics::describe_counter!(
        ELEMENTS_INITIALIZED,
        Unit::Count,
        "Total number of elements initialized"
    );
    metrics::describe_counter!(
        ELEMENTS_TERMINATED,
        Unit::Count,
        "Total number of elements terminated"
    );
    metrics::describe_counter!(LINKS_CREATED, Unit::Count, "Total number of pad links made");
    metrics::describe_gauge!(
        QUEUE_SIZE,
        Unit::Count,
        "Fill level of a pull queue, in its demand unit"
    );
    metrics::describe_gauge!(METRIC_VALUE, Unit::Count, "User-reported metric value");
}

/// Record an element's initialization.
#[inline]
pub fn record_element_init(element: &str) {
    if telemetry_enabled() {
        metrics::counter!(ELEMENTS_INITIALIZED, "element" => element.to_string()).increment(1);
    }
}

/// Record an element's termination.
#[inline]
pub fn record_element_terminate(element: &str) {
    if telemetry_enabled() {
        metrics::counter!(ELEMENTS_TERMINATED, "element" => element.to_string()).increment(1);
    }
}

/// Record a newly established link.
#[inline]
pub fn record_link_new(from: &str, to: &str) {
    if telemetry_enabled() {
        metrics::counter!(
            LINKS_CREATED,
            "from" => from.to_string(),
            "to" => to.to_string()
        )
        .increment(1);
    }
}

/// Record a pull queue's fill level.
#[inline]
pub fn record_queue_size(element: &str, pad: &PadRef, size: u64) {
    if telemetry_enabled() {
        metrics::gauge!(
            QUEUE_SIZE,
            "element" => element.to_string(),
            "pad" => pad.to_string()
        )
        .set(size as f64);
    }
}

/// Record an arbitrary named value.
#[inline]
pub fn record_metric_value(name: &str, value: f64) {
    if telemetry_enabled() {
        metrics::gauge!(METRIC_VALUE, "name" => name.to_string()).set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent() {
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_recording_without_recorder_does_not_panic() {
        set_telemetry_enabled(true);
        record_element_init("src");
        record_element_terminate("src");
        record_link_new("src", "sink");
        record_queue_size("sink", &PadRef::from_name("input"), 10);
        record_metric_value("frames", 42.0);
        set_telemetry_enabled(false);
    }

    #[test]
    fn test_flag_round_trip() {
        set_telemetry_enabled(true);
        assert!(telemetry_enabled());
        set_telemetry_enabled(false);
        assert!(!telemetry_enabled());
    }
}
