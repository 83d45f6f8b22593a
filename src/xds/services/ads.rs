use std::pin::Pin;
use std::sync::Arc;

use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_server::AggregatedDiscoveryService, DeltaDiscoveryRequest,
    DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::xds::cache::SnapshotCache;

use super::stream::run_stream;

/// Aggregated Discovery Service serving every resource family on one stream.
#[derive(Debug, Clone)]
pub struct AggregatedDiscoveryServiceImpl {
    cache: Arc<SnapshotCache>,
    shutdown: CancellationToken,
}

impl AggregatedDiscoveryServiceImpl {
    pub fn new(cache: Arc<SnapshotCache>, shutdown: CancellationToken) -> Self {
        Self { cache, shutdown }
    }
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for AggregatedDiscoveryServiceImpl {
    type StreamAggregatedResourcesStream =
        Pin<Box<dyn Stream<Item = std::result::Result<DiscoveryResponse, Status>> + Send>>;
    type DeltaAggregatedResourcesStream =
        Pin<Box<dyn Stream<Item = std::result::Result<DeltaDiscoveryResponse, Status>> + Send>>;

    async fn stream_aggregated_resources(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        info!(peer = ?request.remote_addr(), "New ADS stream connection established");

        let stream = run_stream(
            self.cache.clone(),
            request.into_inner(),
            "ADS",
            None,
            self.shutdown.child_token(),
        );

        Ok(Response::new(Box::pin(stream)))
    }

    async fn delta_aggregated_resources(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        Err(Status::unimplemented("incremental xDS is not supported"))
    }
}
