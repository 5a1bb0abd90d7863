//! Prometheus metrics for the entity runtime.
//!
//! Recorders are plain associated functions so any component can record
//! without holding a handle. Without an installed recorder they are no-ops.
//!
//! # Example
//!
//! ```rust,no_run
//! use casework_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use casework_core::response::FailureKind;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

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

/// Prometheus metrics endpoint state.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a metrics server for the given scrape address.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed (several servers in one test binary) is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .set_buckets_for_metric(
                Matcher::Full("casework_propagation_steps".to_string()),
                &[1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 500.0, 1000.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
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

    /// The scrape address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "casework_commands_total",
        "Commands handled, labelled by entity type and outcome"
    );
    describe_histogram!(
        "casework_command_duration_seconds",
        "Time from admission to response"
    );
    describe_counter!(
        "casework_events_persisted_total",
        "Events appended to the event store"
    );
    describe_histogram!(
        "casework_append_duration_seconds",
        "Time taken to append a command's events"
    );
    describe_counter!("casework_recoveries_total", "Entity recoveries by outcome");
    describe_histogram!("casework_recovery_duration_seconds", "Time taken to replay an entity");
    describe_counter!(
        "casework_broken_entities_total",
        "Entities quarantined after a failed recovery"
    );
    describe_gauge!("casework_active_entities", "Entity actors currently running");
    describe_histogram!(
        "casework_propagation_steps",
        "Transition propagation steps per command"
    );
    describe_counter!(
        "casework_unmatched_responses_total",
        "Responses that arrived without a pending ask"
    );
    describe_counter!("casework_timers_fired_total", "Timers that fired and were delivered");
    describe_counter!("casework_snapshots_saved_total", "Entity snapshots saved");
}

/// Command pipeline metrics recorder.
pub struct CommandMetrics;

impl CommandMetrics {
    /// Record a handled command.
    pub fn record(entity_type: &'static str, failure: Option<FailureKind>, duration: Duration) {
        let outcome = failure.map_or("Success", FailureKind::manifest);
        counter!("casework_commands_total", "entity_type" => entity_type, "outcome" => outcome)
            .increment(1);
        histogram!("casework_command_duration_seconds", "entity_type" => entity_type)
            .record(duration.as_secs_f64());
    }

    /// Record a persisted batch.
    pub fn record_append(entity_type: &'static str, count: usize, duration: Duration) {
        counter!("casework_events_persisted_total", "entity_type" => entity_type)
            .increment(count as u64);
        histogram!("casework_append_duration_seconds", "entity_type" => entity_type)
            .record(duration.as_secs_f64());
    }

    /// Record a response without a pending ask.
    pub fn record_unmatched_response(entity_type: &'static str) {
        counter!("casework_unmatched_responses_total", "entity_type" => entity_type).increment(1);
    }

    /// Record a delivered timer.
    pub fn record_timer_fired(entity_type: &'static str) {
        counter!("casework_timers_fired_total", "entity_type" => entity_type).increment(1);
    }

    /// Record a saved snapshot.
    pub fn record_snapshot(entity_type: &'static str) {
        counter!("casework_snapshots_saved_total", "entity_type" => entity_type).increment(1);
    }
}

/// Entity lifecycle metrics recorder.
pub struct LifecycleMetrics;

impl LifecycleMetrics {
    /// Record a finished recovery.
    pub fn record_recovery(entity_type: &'static str, outcome: &'static str, duration: Duration) {
        counter!("casework_recoveries_total", "entity_type" => entity_type, "outcome" => outcome)
            .increment(1);
        histogram!("casework_recovery_duration_seconds", "entity_type" => entity_type)
            .record(duration.as_secs_f64());
    }

    /// Record a quarantined entity.
    pub fn record_broken(entity_type: &'static str) {
        counter!("casework_broken_entities_total", "entity_type" => entity_type).increment(1);
    }

    /// An actor started.
    pub fn actor_started(entity_type: &'static str) {
        gauge!("casework_active_entities", "entity_type" => entity_type).increment(1.0);
    }

    /// An actor stopped.
    pub fn actor_stopped(entity_type: &'static str) {
        gauge!("casework_active_entities", "entity_type" => entity_type).decrement(1.0);
    }
}

/// Transition propagation metrics recorder.
pub struct PropagationMetrics;

impl PropagationMetrics {
    /// Record the number of propagation steps one command took.
    #[allow(clippy::cast_precision_loss)] // step counts stay far below 2^52
    pub fn record_steps(entity_type: &'static str, steps: usize) {
        histogram!("casework_propagation_steps", "entity_type" => entity_type).record(steps as f64);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn server_starts_and_renders() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.render().is_none());
        server.start().unwrap();

        CommandMetrics::record("Case", None, Duration::from_millis(3));
        CommandMetrics::record("Case", Some(FailureKind::Validation), Duration::from_millis(1));
        CommandMetrics::record_append("Case", 4, Duration::from_millis(2));
        LifecycleMetrics::actor_started("Case");

        // Another test binary thread may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("casework_commands_total"));
            assert!(rendered.contains("casework_events_persisted_total"));
        }
    }

    #[test]
    fn recorders_are_noops_without_recorder() {
        LifecycleMetrics::record_recovery("Case", "ready", Duration::from_millis(1));
        LifecycleMetrics::record_broken("Case");
        PropagationMetrics::record_steps("Case", 12);
        CommandMetrics::record_unmatched_response("Case");
    }
}
