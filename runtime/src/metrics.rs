//! Prometheus metrics for observability and monitoring.
//!
//! Covers the runtime itself (reducer execution, effect handling). Domain
//! crates describe and record their own metrics through the same recorder.
//!
//! # Example
//!
//! ```rust,no_run
//! use passgate_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! // Serve `recorder.render()` from a `/metrics` route
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder handle.
///
/// Installs the global recorder and renders the scrape payload on demand.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create a recorder that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe runtime metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder may only be installed once per process. A second install
    /// (common in tests) is logged and treated as success without a handle.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        describe_runtime_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if the recorder was never installed by this handle.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn describe_runtime_metrics() {
    describe_counter!(
        "reducer_actions_processed_total",
        "Total number of actions reduced by stores"
    );
    describe_histogram!(
        "reducer_execution_duration_seconds",
        "Time spent inside reducers"
    );
    describe_counter!(
        "reducer_feedback_aborted_total",
        "Sends aborted because the feedback loop did not settle"
    );
    describe_counter!("effects_executed_total", "Total number of effects executed");
    describe_histogram!(
        "effect_execution_duration_seconds",
        "Time taken by future effects"
    );
}

/// Reducer metrics recorder.
pub struct ReducerMetrics;

impl ReducerMetrics {
    /// Record an action processed.
    pub fn record_action(duration: Duration) {
        counter!("reducer_actions_processed_total").increment(1);
        histogram!("reducer_execution_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a send aborted by the feedback limit.
    pub fn record_error() {
        counter!("reducer_feedback_aborted_total").increment(1);
    }
}

/// Effect metrics recorder.
pub struct EffectMetrics;

impl EffectMetrics {
    /// Record an effect of the given kind being executed.
    pub fn record_kind(kind: &'static str) {
        counter!("effects_executed_total", "type" => kind).increment(1);
    }

    /// Record how long a future effect took.
    pub fn record_execution(duration: Duration) {
        histogram!("effect_execution_duration_seconds").record(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninstalled_recorder_renders_nothing() {
        let recorder = MetricsRecorder::new();
        assert!(recorder.render().is_none());
    }

    #[test]
    fn recorders_are_safe_without_installed_exporter() {
        ReducerMetrics::record_action(Duration::from_millis(1));
        ReducerMetrics::record_error();
        EffectMetrics::record_kind("future");
        EffectMetrics::record_execution(Duration::from_millis(2));
    }
}
