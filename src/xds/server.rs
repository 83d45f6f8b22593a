//! xDS gRPC server bootstrap.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryServiceServer;
use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryServiceServer;
use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryServiceServer;
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryServiceServer;
use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryServiceServer;
use envoy_types::pb::envoy::service::secret::v3::secret_discovery_service_server::SecretDiscoveryServiceServer;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::info;

use crate::config::XdsConfig;
use crate::{Error, Result};

use super::cache::SnapshotCache;
use super::services::{AggregatedDiscoveryServiceImpl, FamilyDiscoveryService};

pub fn parse_bind_address(config: &XdsConfig) -> Result<SocketAddr> {
    config
        .bind_address()
        .parse()
        .map_err(|e| Error::config(format!("Invalid xDS address: {}", e)))
}

/// Serve ADS and the single-family discovery services until `shutdown`
/// fires. Open streams are closed through the same token.
pub async fn serve(
    cache: Arc<SnapshotCache>,
    config: &XdsConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = parse_bind_address(config)?;
    serve_at(cache, addr, shutdown.clone(), async move { shutdown.cancelled().await }).await
}

async fn serve_at<F>(
    cache: Arc<SnapshotCache>,
    addr: SocketAddr,
    shutdown: CancellationToken,
    signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let ads = AggregatedDiscoveryServiceImpl::new(cache.clone(), shutdown.clone());
    let family = FamilyDiscoveryService::new(cache, shutdown);

    info!(address = %addr, "Starting Envoy xDS server");

    Server::builder()
        .add_service(AggregatedDiscoveryServiceServer::new(ads))
        .add_service(ListenerDiscoveryServiceServer::new(family.clone()))
        .add_service(RouteDiscoveryServiceServer::new(family.clone()))
        .add_service(ClusterDiscoveryServiceServer::new(family.clone()))
        .add_service(EndpointDiscoveryServiceServer::new(family.clone()))
        .add_service(SecretDiscoveryServiceServer::new(family))
        .serve_with_shutdown(addr, signal)
        .await
        .map_err(|e| {
            let error_msg = e.to_string();
            if error_msg.contains("Address already in use") || error_msg.contains("bind") {
                Error::transport(format!(
                    "xDS server failed to bind to {}: port {} is already in use",
                    addr,
                    addr.port()
                ))
            } else {
                Error::transport(format!("xDS server failed: {}", e))
            }
        })?;

    info!("xDS server stopped");
    Ok(())
}
