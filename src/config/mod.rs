//! # Configuration Management
//!
//! gateplane reads an optional YAML file, then applies `GATEPLANE_*`
//! environment overrides, then validates the result. Unknown keys in the file
//! are rejected so typos surface at startup.

pub mod settings;

use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::Validate;

pub use settings::{
    HttpVersion, ListenerAddress, ListenersConfig, NetworkConfig, ObservabilityConfig,
    PolicyConfig, ReconcileConfig, TimeoutsConfig, TlsConfig, XdsConfig,
};

use crate::errors::{Error, Result};
use crate::graph::ConflictPrecedence;
use crate::utils::{is_valid_header_name, Timeout};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    #[validate(nested)]
    pub xds: XdsConfig,

    #[validate(nested)]
    pub listeners: ListenersConfig,

    pub timeouts: TimeoutsConfig,

    pub policy: PolicyConfig,

    pub tls: TlsConfig,

    #[validate(nested)]
    pub network: NetworkConfig,

    /// Ignore `permit_insecure` on routing objects.
    pub disable_permit_insecure: bool,

    pub disable_merge_slashes: bool,

    pub disable_allow_chunked_length: bool,

    /// Empty means both HTTP/1.1 and HTTP/2.
    pub default_http_versions: Vec<HttpVersion>,

    /// Which of two identical routes wins.
    pub conflict_precedence: ConflictPrecedence,

    #[validate(nested)]
    pub reconcile: ReconcileConfig,

    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse a YAML document. Missing sections take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load from an optional file plus the process environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    Error::config(format!("Failed to read config file {}: {}", path.display(), e))
                })?;
                Self::from_yaml_str(&contents)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `GATEPLANE_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("GATEPLANE_XDS_BIND_ADDRESS") {
            self.xds.bind_address = address;
        }
        if let Some(port) = lookup("GATEPLANE_XDS_PORT") {
            self.xds.port =
                port.parse().map_err(|e| Error::config(format!("Invalid XDS port: {}", e)))?;
        }
        if let Some(level) = lookup("GATEPLANE_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(json) = lookup("GATEPLANE_LOG_JSON") {
            self.observability.json_logs = parse_bool("GATEPLANE_LOG_JSON", &json)?;
        }
        if let Some(enabled) = lookup("GATEPLANE_ENABLE_METRICS") {
            self.observability.enable_metrics = parse_bool("GATEPLANE_ENABLE_METRICS", &enabled)?;
        }
        if let Some(port) = lookup("GATEPLANE_METRICS_PORT") {
            self.observability.metrics_port =
                port.parse().map_err(|e| Error::config(format!("Invalid metrics port: {}", e)))?;
        }
        if let Some(flag) = lookup("GATEPLANE_DISABLE_PERMIT_INSECURE") {
            self.disable_permit_insecure = parse_bool("GATEPLANE_DISABLE_PERMIT_INSECURE", &flag)?;
        }
        Ok(())
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()
    }

    /// Checks the validator derive cannot express.
    fn validate_custom(&self) -> Result<()> {
        let ports = [
            ("xds", self.xds.port),
            ("http listener", self.listeners.http.port),
            ("https listener", self.listeners.https.port),
        ];
        for (i, (a_name, a)) in ports.iter().enumerate() {
            for (b_name, b) in &ports[i + 1..] {
                if a == b {
                    return Err(Error::validation(format!(
                        "{} and {} ports cannot be the same ({})",
                        a_name, b_name, a
                    )));
                }
            }
        }

        let timeouts = [
            ("request", &self.timeouts.request),
            ("connection_idle", &self.timeouts.connection_idle),
            ("stream_idle", &self.timeouts.stream_idle),
            ("max_connection_duration", &self.timeouts.max_connection_duration),
            ("delayed_close", &self.timeouts.delayed_close),
            ("connection_shutdown_grace_period", &self.timeouts.connection_shutdown_grace_period),
        ];
        for (name, value) in timeouts {
            Timeout::parse(value)
                .map_err(|e| Error::validation(format!("invalid {} timeout: {}", name, e)))?;
        }
        if matches!(Timeout::parse(&self.timeouts.connect), Ok(Timeout::Infinite)) {
            return Err(Error::validation("connect timeout cannot be infinite"));
        }
        Timeout::parse(&self.timeouts.connect)
            .map_err(|e| Error::validation(format!("invalid connect timeout: {}", e)))?;

        for policy in [&self.policy.request_headers, &self.policy.response_headers] {
            for name in policy.set.keys().chain(policy.remove.iter()) {
                if !is_valid_header_name(name) {
                    return Err(Error::validation(format!("invalid header name {:?}", name)));
                }
            }
        }

        if !matches!(self.tls.minimum_protocol_version.as_str(), "1.2" | "1.3") {
            return Err(Error::validation(format!(
                "invalid minimum TLS protocol version {:?}, expected 1.2 or 1.3",
                self.tls.minimum_protocol_version
            )));
        }

        if !self.listeners.connection_balancer.is_empty()
            && self.listeners.connection_balancer != "exact"
        {
            return Err(Error::validation(format!(
                "invalid listener connection balancer value {:?}, only 'exact' is supported",
                self.listeners.connection_balancer
            )));
        }

        if self.reconcile.retry_initial_ms > self.reconcile.retry_max_ms {
            return Err(Error::validation("retry_initial_ms cannot exceed retry_max_ms"));
        }

        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::config(format!("Invalid boolean for {}: {:?}", key, other))),
    }
}
