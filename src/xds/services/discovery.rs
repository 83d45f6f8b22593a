//! Single-family discovery services (LDS, RDS, CDS, EDS, SDS).
//!
//! Every service shares the stream loop with ADS but pins the connection to
//! its own family. Unary fetches answer from the current cache content.

use std::pin::Pin;
use std::sync::Arc;

use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryService;
use envoy_types::pb::envoy::service::discovery::v3::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryService;
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryService;
use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryService;
use envoy_types::pb::envoy::service::secret::v3::secret_discovery_service_server::SecretDiscoveryService;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::xds::cache::SnapshotCache;
use crate::xds::resources::ResourceFamily;

use super::stream::{fetch_response, run_stream};

type ResponseStream = Pin<Box<dyn Stream<Item = Result<DiscoveryResponse, Status>> + Send>>;
type DeltaResponseStream =
    Pin<Box<dyn Stream<Item = Result<DeltaDiscoveryResponse, Status>> + Send>>;

/// Backs every single-family discovery service. One instance is registered
/// once per family with the gRPC server.
#[derive(Debug, Clone)]
pub struct FamilyDiscoveryService {
    cache: Arc<SnapshotCache>,
    shutdown: CancellationToken,
}

impl FamilyDiscoveryService {
    pub fn new(cache: Arc<SnapshotCache>, shutdown: CancellationToken) -> Self {
        Self { cache, shutdown }
    }

    fn stream(
        &self,
        family: ResourceFamily,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> Response<ResponseStream> {
        info!(family = %family, peer = ?request.remote_addr(), "New discovery stream established");
        let label = family.as_str().to_uppercase();
        let stream = run_stream(
            self.cache.clone(),
            request.into_inner(),
            &label,
            Some(family),
            self.shutdown.child_token(),
        );
        Response::new(Box::pin(stream))
    }

    fn fetch(
        &self,
        family: ResourceFamily,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        fetch_response(&self.cache, family, request.get_ref()).map(Response::new)
    }
}

/// Implements one single-family service trait. The generated traits differ
/// only in method and associated type names.
macro_rules! family_service {
    (
        $service:ident, $family:expr,
        $stream_ty:ident, $stream_fn:ident,
        $delta_ty:ident, $delta_fn:ident,
        $fetch_fn:ident
    ) => {
        #[tonic::async_trait]
        impl $service for FamilyDiscoveryService {
            type $stream_ty = ResponseStream;
            type $delta_ty = DeltaResponseStream;

            async fn $stream_fn(
                &self,
                request: Request<tonic::Streaming<DiscoveryRequest>>,
            ) -> Result<Response<Self::$stream_ty>, Status> {
                Ok(self.stream($family, request))
            }

            async fn $delta_fn(
                &self,
                _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
            ) -> Result<Response<Self::$delta_ty>, Status> {
                Err(Status::unimplemented("incremental xDS is not supported"))
            }

            async fn $fetch_fn(
                &self,
                request: Request<DiscoveryRequest>,
            ) -> Result<Response<DiscoveryResponse>, Status> {
                self.fetch($family, request)
            }
        }
    };
}

family_service!(
    ListenerDiscoveryService,
    ResourceFamily::Listener,
    StreamListenersStream,
    stream_listeners,
    DeltaListenersStream,
    delta_listeners,
    fetch_listeners
);

family_service!(
    RouteDiscoveryService,
    ResourceFamily::Route,
    StreamRoutesStream,
    stream_routes,
    DeltaRoutesStream,
    delta_routes,
    fetch_routes
);

family_service!(
    ClusterDiscoveryService,
    ResourceFamily::Cluster,
    StreamClustersStream,
    stream_clusters,
    DeltaClustersStream,
    delta_clusters,
    fetch_clusters
);

family_service!(
    EndpointDiscoveryService,
    ResourceFamily::Endpoint,
    StreamEndpointsStream,
    stream_endpoints,
    DeltaEndpointsStream,
    delta_endpoints,
    fetch_endpoints
);

family_service!(
    SecretDiscoveryService,
    ResourceFamily::Secret,
    StreamSecretsStream,
    stream_secrets,
    DeltaSecretsStream,
    delta_secrets,
    fetch_secrets
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::resources::ResourceSnapshot;
    use envoy_types::pb::google::protobuf::Any;

    #[tokio::test]
    async fn fetch_before_publish_is_unavailable() {
        let service = FamilyDiscoveryService::new(Arc::new(SnapshotCache::new()), CancellationToken::new());
        let err = service
            .fetch_clusters(Request::new(DiscoveryRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn fetch_returns_current_content() {
        let cache = Arc::new(SnapshotCache::new());
        let mut snapshot = ResourceSnapshot::default();
        snapshot.clusters.insert(
            "ns/web/80".into(),
            Any { type_url: ResourceFamily::Cluster.type_url().into(), value: vec![1] },
        );
        cache.publish(snapshot).await;

        let service = FamilyDiscoveryService::new(cache, CancellationToken::new());
        let response = service
            .fetch_clusters(Request::new(DiscoveryRequest::default()))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.version_info, "1");
        assert_eq!(response.type_url, ResourceFamily::Cluster.type_url());
        assert_eq!(response.resources.len(), 1);
    }

    #[tokio::test]
    async fn fetch_rejects_foreign_type_url() {
        let cache = Arc::new(SnapshotCache::new());
        cache.publish(ResourceSnapshot::default()).await;
        let service = FamilyDiscoveryService::new(cache, CancellationToken::new());

        let request = DiscoveryRequest {
            type_url: ResourceFamily::Listener.type_url().into(),
            ..Default::default()
        };
        let err = service.fetch_routes(Request::new(request)).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }
}
