//! # Metrics Collection
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`init_metrics`] installs the Prometheus exporter.

use std::net::SocketAddr;

use ::tracing::{info, warn};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::ObservabilityConfig;
use crate::errors::{Error, Result};

/// Metrics recorder that tracks control plane metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Record an xDS stream connection event
    pub fn record_xds_connection(&self, connected: bool) {
        if connected {
            gauge!("xds_connections_active").increment(1.0);
            counter!("xds_connections_total").increment(1);
        } else {
            gauge!("xds_connections_active").decrement(1.0);
        }
    }

    /// Record an ACK or NACK for a resource family
    pub fn record_xds_ack(&self, family: &'static str, accepted: bool) {
        let outcome = if accepted { "ack" } else { "nack" };
        counter!("xds_acks_total", "family" => family, "outcome" => outcome).increment(1);
    }

    /// Record a response pushed to a client
    pub fn record_xds_push(&self, family: &'static str, resource_count: usize) {
        counter!("xds_pushes_total", "family" => family).increment(1);
        histogram!("xds_push_resources", "family" => family).record(resource_count as f64);
    }

    /// Record a connection closed because of a protocol violation
    pub fn record_xds_protocol_error(&self, kind: &'static str) {
        counter!("xds_protocol_errors_total", "kind" => kind).increment(1);
    }

    /// Record the version a family was published at
    pub fn record_publish(&self, family: &'static str, version: u64) {
        gauge!("snapshot_version", "family" => family).set(version as f64);
        counter!("snapshot_publishes_total", "family" => family).increment(1);
    }

    /// Record one reconcile cycle
    pub fn record_reconcile(&self, duration: f64, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!("reconcile_cycles_total", "status" => status).increment(1);
        histogram!("reconcile_duration_seconds").record(duration);
    }

    /// Record admission outcomes of the last build
    pub fn update_admission_counts(&self, valid: usize, invalid: usize, orphaned: usize) {
        gauge!("routing_objects", "status" => "valid").set(valid as f64);
        gauge!("routing_objects", "status" => "invalid").set(invalid as f64);
        gauge!("routing_objects", "status" => "orphaned").set(orphaned as f64);
    }

    /// Register descriptions so Prometheus exports appear before events occur.
    pub fn register_metrics(&self) {
        describe_gauge!("xds_connections_active", Unit::Count, "Open xDS streams");
        describe_counter!("xds_connections_total", Unit::Count, "xDS streams accepted");
        describe_counter!("xds_acks_total", Unit::Count, "ACK/NACK responses by family");
        describe_counter!("xds_pushes_total", Unit::Count, "Discovery responses sent by family");
        describe_histogram!("xds_push_resources", Unit::Count, "Resources per discovery response");
        describe_counter!(
            "xds_protocol_errors_total",
            Unit::Count,
            "Streams closed because of protocol violations"
        );
        describe_gauge!("snapshot_version", Unit::Count, "Published version per family");
        describe_counter!("snapshot_publishes_total", Unit::Count, "Version bumps per family");
        describe_counter!("reconcile_cycles_total", Unit::Count, "Reconcile cycles by outcome");
        describe_histogram!("reconcile_duration_seconds", Unit::Seconds, "Reconcile cycle duration");
        describe_gauge!("routing_objects", Unit::Count, "Routing objects by admission status");

        gauge!("xds_connections_active").set(0.0);
    }
}

/// Initialize metrics collection and Prometheus exporter
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        Error::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| Error::config(format!("Failed to initialize metrics exporter: {}", e)))?;

    MetricsRecorder::new().register_metrics();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_exporter_is_noop() {
        let recorder = MetricsRecorder::new();
        recorder.record_xds_connection(true);
        recorder.record_xds_ack("listeners", false);
        recorder.record_xds_push("clusters", 3);
        recorder.record_publish("routes", 7);
        recorder.record_reconcile(0.01, true);
        recorder.update_admission_counts(1, 2, 3);
        recorder.record_xds_connection(false);
    }

    #[test]
    fn disabled_metrics_skip_exporter() {
        let config = ObservabilityConfig { enable_metrics: false, ..Default::default() };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn invalid_bind_address_is_config_error() {
        let config = ObservabilityConfig {
            enable_metrics: true,
            metrics_bind_address: "not an address".to_string(),
            ..Default::default()
        };
        assert!(matches!(init_metrics(&config), Err(Error::Config(_))));
    }
}
