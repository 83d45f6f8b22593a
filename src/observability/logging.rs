//! # Structured Logging
//!
//! `tracing-subscriber` setup plus span macros for the xDS and reconcile paths.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, ObservabilityConfig};
use crate::errors::{Error, Result};

/// Create a tracing span for xDS operations
#[macro_export]
macro_rules! xds_span {
    ($operation:expr, $stream:expr) => {
        tracing::info_span!(
            "xds_operation",
            operation = %$operation,
            stream = %$stream,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $stream:expr, $($field:tt)*) => {
        tracing::info_span!(
            "xds_operation",
            operation = %$operation,
            stream = %$stream,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for one reconcile cycle
#[macro_export]
macro_rules! reconcile_span {
    ($cycle:expr) => {
        tracing::info_span!("reconcile", cycle = $cycle)
    };
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| Error::config(format!("Invalid log level '{}': {}", config.log_level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logs {
        registry.with(fmt::layer().json().with_current_span(true).with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))
}

/// Log configuration at startup
pub fn log_config_info(config: &Config) {
    tracing::info!(
        xds_address = %config.xds.bind_address(),
        http_listener = %format!("{}:{}", config.listeners.http.address, config.listeners.http.port),
        https_listener = %format!("{}:{}", config.listeners.https.address, config.listeners.https.port),
        conflict_precedence = ?config.conflict_precedence,
        disable_permit_insecure = config.disable_permit_insecure,
        metrics_enabled = config.observability.enable_metrics,
        "gateplane control plane configuration"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_compile() {
        let _span = xds_span!("stream", "ads-1");
        let _span = xds_span!("stream", "ads-1", type_url = "listeners");
        let _span = reconcile_span!(3u64);
    }

    #[test]
    fn test_log_config_info() {
        log_config_info(&Config::default());
    }
}
