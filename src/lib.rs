//! # gateplane
//!
//! gateplane is an Envoy control plane. It reads routing objects, services,
//! endpoints and TLS secrets from an object source, resolves them into a
//! dependency graph, translates the graph into Envoy xDS resources and serves
//! them to proxies over gRPC.
//!
//! ## Architecture
//!
//! ```text
//! Object Source → Reconciler → Graph Builder → Translator → Snapshot Cache → xDS Server → Envoy
//!                      ↓
//!                 Status Sink
//! ```
//!
//! ## Core Components
//!
//! - **Graph Builder** ([`graph`]): admission, includes, TLS and conflict resolution
//! - **Translator** ([`xds::translate`]): graph to listeners, routes, clusters, endpoints and secrets
//! - **Snapshot Cache** ([`xds::SnapshotCache`]): versioned per-family content
//! - **xDS Server** ([`xds::serve`]): State-of-the-World ADS and single-family services
//! - **Reconciler** ([`services::Reconciler`]): drives rebuilds from change notifications
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use gateplane::{Config, Result, Server};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load(None)?;
//!     let server = Server::new(config, "objects.yaml");
//!     server.run(CancellationToken::new()).await
//! }
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod errors;
pub mod graph;
pub mod observability;
pub mod services;
pub mod sources;
pub mod utils;
pub mod xds;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// Re-export commonly used types and traits
pub use config::Config;
pub use errors::{Error, Result};
pub use observability::init_observability;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Main server structure that wires the manifest source, the reconciler and
/// the xDS server together.
#[derive(Debug)]
pub struct Server {
    config: Config,
    manifest: PathBuf,
}

impl Server {
    pub fn new(config: Config, manifest: impl Into<PathBuf>) -> Self {
        Self { config, manifest: manifest.into() }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Serve until `shutdown` fires or the gRPC server fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let cache = Arc::new(xds::SnapshotCache::new());
        let notifier = domain::ChangeNotifier::new();
        let source = sources::FileSource::new(self.manifest.clone());

        let reconciler = services::Reconciler::new(
            Arc::new(source.clone()),
            Arc::new(domain::LoggingStatusSink),
            cache.clone(),
            notifier.clone(),
        )
        .configured(&self.config);

        let poll_interval = Duration::from_millis(self.config.reconcile.poll_interval_ms);
        let watcher = tokio::spawn(source.watch(notifier, poll_interval, shutdown.child_token()));
        let driver = tokio::spawn(reconciler.run(shutdown.child_token()));

        info!(manifest = %self.manifest.display(), "gateplane control plane starting");
        let served = xds::serve(cache, &self.config.xds, shutdown.clone()).await;

        shutdown.cancel();
        for (name, task) in [("manifest watcher", watcher), ("reconciler", driver)] {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "Background task ended abnormally");
            }
        }
        served
    }
}
