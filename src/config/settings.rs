//! # Configuration Settings
//!
//! Section structs of the gateplane configuration file. Every section has
//! defaults so an empty file (or no file) yields a working control plane.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::HeadersPolicy;

/// xDS gRPC server binding
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct XdsConfig {
    #[validate(length(min = 1, message = "xDS bind address cannot be empty"))]
    pub bind_address: String,

    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,
}

impl Default for XdsConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0".to_string(), port: 8001 }
    }
}

impl XdsConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Address Envoy binds one of its listeners to.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ListenerAddress {
    #[validate(length(min = 1, message = "listener address cannot be empty"))]
    pub address: String,

    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,
}

/// Envoy's insecure and secure listener bindings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ListenersConfig {
    #[validate(nested)]
    pub http: ListenerAddress,

    #[validate(nested)]
    pub https: ListenerAddress,

    /// Empty, or `exact` to use Envoy's exact connection balancer.
    pub connection_balancer: String,
}

impl Default for ListenersConfig {
    fn default() -> Self {
        Self {
            http: ListenerAddress { address: "0.0.0.0".to_string(), port: 8080 },
            https: ListenerAddress { address: "0.0.0.0".to_string(), port: 8443 },
            connection_balancer: String::new(),
        }
    }
}

/// Proxy-wide timeouts. Each accepts `infinity` or a duration string; empty
/// leaves Envoy's default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutsConfig {
    pub request: String,
    pub connection_idle: String,
    pub stream_idle: String,
    pub max_connection_duration: String,
    pub delayed_close: String,
    pub connection_shutdown_grace_period: String,
    pub connect: String,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request: String::new(),
            connection_idle: "60s".to_string(),
            stream_idle: String::new(),
            max_connection_duration: String::new(),
            delayed_close: String::new(),
            connection_shutdown_grace_period: String::new(),
            connect: "2s".to_string(),
        }
    }
}

/// Header mutations applied to every route table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub request_headers: HeadersPolicy,
    pub response_headers: HeadersPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TlsConfig {
    /// `1.2` or `1.3`.
    pub minimum_protocol_version: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self { minimum_protocol_version: "1.2".to_string() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Trusted hops in X-Forwarded-For.
    #[validate(range(max = 16, message = "num_trusted_hops must be at most 16"))]
    pub num_trusted_hops: u32,
}

/// HTTP versions Envoy offers to downstream clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HttpVersion {
    #[serde(rename = "HTTP/1.1")]
    Http1,
    #[serde(rename = "HTTP/2")]
    Http2,
}

/// Timing of the reconciliation loop.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Quiet period after a notification before rebuilding.
    #[validate(range(max = 60000, message = "debounce_ms must be at most 60000"))]
    pub debounce_ms: u64,

    #[validate(range(min = 1, message = "retry_initial_ms must be positive"))]
    pub retry_initial_ms: u64,

    #[validate(range(min = 1, message = "retry_max_ms must be positive"))]
    pub retry_max_ms: u64,

    /// How often the file source checks its manifest for changes.
    #[validate(range(min = 50, message = "poll_interval_ms must be at least 50"))]
    pub poll_interval_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { debounce_ms: 100, retry_initial_ms: 500, retry_max_ms: 30_000, poll_interval_ms: 2_000 }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Emit JSON log lines instead of human readable ones.
    pub json_logs: bool,

    /// Enable Prometheus metrics exporter
    pub enable_metrics: bool,

    #[validate(length(min = 1, message = "Metrics bind address cannot be empty"))]
    pub metrics_bind_address: String,

    pub metrics_port: u16,

    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            enable_metrics: false,
            metrics_bind_address: "0.0.0.0".to_string(),
            metrics_port: 9090,
            service_name: "gateplane".to_string(),
        }
    }
}

impl ObservabilityConfig {
    /// Metrics listener address; `None` when the port is 0.
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("{}:{}", self.metrics_bind_address, self.metrics_port))
        }
    }
}
