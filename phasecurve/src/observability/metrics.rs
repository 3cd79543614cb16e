//! Metrics collection for `PhaseCurve`.
//!
//! Provides Prometheus-compatible metrics with label cardinality protection
//! and typed convenience functions for recording envelope activity.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::PhaseCurveError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Label used for the idle envelope.
pub const IDLE_LABEL: &str = "__idle__";

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without
/// an HTTP endpoint.
///
/// # Errors
///
/// Returns `PhaseCurveError::Io` if the recorder or HTTP listener
/// cannot be installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), PhaseCurveError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| PhaseCurveError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

/// Registers metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!(
        "phasecurve_phase_transitions_total",
        "Total number of phase transitions by cause"
    );
    describe_counter!("phasecurve_ticks_total", "Total number of envelope ticks");
    describe_counter!(
        "phasecurve_evaluation_errors_total",
        "Formula evaluation failures by phase"
    );
    describe_counter!(
        "phasecurve_below_default_total",
        "Phase entries whose value dropped below the default value"
    );
    describe_counter!(
        "phasecurve_triggers_total",
        "Trigger events by outcome (matched or ignored)"
    );
    describe_gauge!(
        "phasecurve_active_phase",
        "Currently active phase (1 = active)"
    );
    describe_gauge!("phasecurve_value", "Most recent envelope value");
    describe_histogram!(
        "phasecurve_simulation_ticks",
        "Ticks needed for a batch simulation to finish"
    );
}

/// Records a phase transition.
///
/// Phase names are sanitized to prevent label cardinality explosion
/// from user-controlled configuration values.
pub fn record_phase_transition(from: Option<&str>, to: Option<&str>, cause: &'static str) {
    counter!(
        "phasecurve_phase_transitions_total",
        "from" => phase_label(from),
        "to" => phase_label(to),
        "cause" => cause,
    )
    .increment(1);
}

/// Sets the currently active phase gauge.
///
/// Zeros out the previous phase label before setting the new one,
/// preventing stale labels from showing `1.0` in Prometheus.
pub fn set_active_phase(phase: Option<&str>, previous: Option<&str>) {
    gauge!("phasecurve_active_phase", "phase_name" => phase_label(previous)).set(0.0);
    gauge!("phasecurve_active_phase", "phase_name" => phase_label(phase)).set(1.0);
}

/// Records one tick and the value it produced.
pub fn record_tick(value: f64) {
    counter!("phasecurve_ticks_total").increment(1);
    gauge!("phasecurve_value").set(value);
}

/// Records a formula evaluation failure.
pub fn record_evaluation_error(phase: &str) {
    counter!(
        "phasecurve_evaluation_errors_total",
        "phase" => sanitize_phase_label(phase)
    )
    .increment(1);
}

/// Records a value below the envelope default.
pub fn record_below_default(phase: &str) {
    counter!(
        "phasecurve_below_default_total",
        "phase" => sanitize_phase_label(phase)
    )
    .increment(1);
}

/// Records a trigger event.
///
/// Event names are caller-controlled, so only the outcome is labelled.
pub fn record_trigger(matched: bool) {
    let outcome = if matched { "matched" } else { "ignored" };
    counter!("phasecurve_triggers_total", "outcome" => outcome).increment(1);
}

/// Records how many ticks a simulation took.
#[allow(clippy::cast_precision_loss)]
pub fn record_simulation(ticks: usize) {
    histogram!("phasecurve_simulation_ticks").record(ticks as f64);
}

/// Maximum length for phase name labels.
///
/// Phase names come from user config and are used directly as Prometheus
/// labels. This caps the label length to prevent cardinality issues.
const MAX_PHASE_LABEL_LEN: usize = 64;

fn phase_label(name: Option<&str>) -> String {
    name.map_or_else(|| IDLE_LABEL.to_string(), sanitize_phase_label)
}

/// Sanitizes a phase name for use as a metrics label.
///
/// Truncates to [`MAX_PHASE_LABEL_LEN`] characters and replaces any
/// characters invalid in Prometheus labels with underscores.
#[must_use]
pub fn sanitize_phase_label(name: &str) -> String {
    name.chars()
        .take(MAX_PHASE_LABEL_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
