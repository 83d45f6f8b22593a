//! State-of-the-World protocol behaviour of a single connection.

use std::sync::Arc;
use std::time::Duration;

use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use envoy_types::pb::google::protobuf::Any;
use envoy_types::pb::google::rpc::Status as RpcStatus;
use gateplane::xds::services::run_stream;
use gateplane::xds::{ResourceFamily, ResourceSnapshot, SnapshotCache};
use prost::Message;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Status};

struct Connection {
    requests: mpsc::Sender<Result<DiscoveryRequest, Status>>,
    responses: ReceiverStream<Result<DiscoveryResponse, Status>>,
    cancel: CancellationToken,
}

impl Connection {
    fn open(cache: &Arc<SnapshotCache>, served: Option<ResourceFamily>) -> Self {
        let (requests, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let responses = run_stream(cache.clone(), ReceiverStream::new(rx), "test", served, cancel.clone());
        Self { requests, responses, cancel }
    }

    async fn send(&self, request: DiscoveryRequest) {
        self.requests.send(Ok(request)).await.expect("stream task alive");
    }

    async fn recv(&mut self) -> Result<DiscoveryResponse, Status> {
        tokio::time::timeout(Duration::from_secs(2), self.responses.next())
            .await
            .expect("response within deadline")
            .expect("stream still open")
    }

    async fn response(&mut self) -> DiscoveryResponse {
        self.recv().await.expect("ok response")
    }

    async fn assert_silent(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(150), self.responses.next()).await;
        assert!(next.is_err(), "unexpected response: {:?}", next);
    }

    async fn assert_closed(&mut self) {
        let next = tokio::time::timeout(Duration::from_secs(2), self.responses.next())
            .await
            .expect("close within deadline");
        assert!(next.is_none(), "stream should be closed");
    }
}

fn request(family: ResourceFamily, names: &[&str]) -> DiscoveryRequest {
    DiscoveryRequest {
        type_url: family.type_url().to_string(),
        resource_names: names.iter().map(|n| n.to_string()).collect(),
        ..Default::default()
    }
}

fn ack(family: ResourceFamily, response: &DiscoveryResponse) -> DiscoveryRequest {
    DiscoveryRequest {
        version_info: response.version_info.clone(),
        response_nonce: response.nonce.clone(),
        ..request(family, &[])
    }
}

fn nack(family: ResourceFamily, response: &DiscoveryResponse, previous: &str) -> DiscoveryRequest {
    DiscoveryRequest {
        version_info: previous.to_string(),
        response_nonce: response.nonce.clone(),
        error_detail: Some(RpcStatus { code: 3, message: "rejected".into(), details: Vec::new() }),
        ..request(family, &[])
    }
}

fn clusters(names: &[&str]) -> ResourceSnapshot {
    let mut snapshot = ResourceSnapshot::default();
    for name in names {
        snapshot.clusters.insert(
            name.to_string(),
            Any { type_url: ResourceFamily::Cluster.type_url().into(), value: name.as_bytes().to_vec() },
        );
    }
    snapshot
}

#[tokio::test]
async fn first_push_waits_for_first_publish() {
    let cache = Arc::new(SnapshotCache::new());
    let mut conn = Connection::open(&cache, None);

    conn.send(request(ResourceFamily::Cluster, &[])).await;
    conn.assert_silent().await;

    cache.publish(clusters(&["a"])).await;
    let response = conn.response().await;
    assert_eq!(response.version_info, "1");
    assert_eq!(response.type_url, ResourceFamily::Cluster.type_url());
    assert_eq!(response.resources.len(), 1);
    assert!(!response.nonce.is_empty());
}

#[tokio::test]
async fn ack_then_newer_version_is_pushed() {
    let cache = Arc::new(SnapshotCache::new());
    cache.publish(clusters(&["a"])).await;
    let mut conn = Connection::open(&cache, None);

    conn.send(request(ResourceFamily::Cluster, &[])).await;
    let first = conn.response().await;
    conn.send(ack(ResourceFamily::Cluster, &first)).await;
    conn.assert_silent().await;

    cache.publish(clusters(&["a", "b"])).await;
    let second = conn.response().await;
    assert_eq!(second.version_info, "2");
    assert_eq!(second.resources.len(), 2);
    assert_ne!(second.nonce, first.nonce);
}

#[tokio::test]
async fn unchanged_publish_sends_nothing() {
    let cache = Arc::new(SnapshotCache::new());
    cache.publish(clusters(&["a"])).await;
    let mut conn = Connection::open(&cache, None);

    conn.send(request(ResourceFamily::Cluster, &[])).await;
    let first = conn.response().await;
    conn.send(ack(ResourceFamily::Cluster, &first)).await;

    cache.publish(clusters(&["a"])).await;
    conn.assert_silent().await;
}

#[tokio::test]
async fn push_is_held_until_the_outstanding_response_is_answered() {
    let cache = Arc::new(SnapshotCache::new());
    cache.publish(clusters(&["a"])).await;
    let mut conn = Connection::open(&cache, None);

    conn.send(request(ResourceFamily::Cluster, &[])).await;
    let first = conn.response().await;

    cache.publish(clusters(&["b"])).await;
    cache.publish(clusters(&["c"])).await;
    conn.assert_silent().await;

    conn.send(ack(ResourceFamily::Cluster, &first)).await;
    let latest = conn.response().await;
    assert_eq!(latest.version_info, "3");
    conn.assert_silent().await;
}

#[tokio::test]
async fn rejected_version_is_not_sent_again() {
    let cache = Arc::new(SnapshotCache::new());
    cache.publish(clusters(&["a"])).await;
    let mut conn = Connection::open(&cache, None);

    conn.send(request(ResourceFamily::Cluster, &[])).await;
    let first = conn.response().await;
    conn.send(nack(ResourceFamily::Cluster, &first, "")).await;
    conn.assert_silent().await;

    cache.publish(clusters(&["fixed"])).await;
    let second = conn.response().await;
    assert_eq!(second.version_info, "2");
}

#[tokio::test]
async fn mismatched_nonce_closes_the_connection() {
    let cache = Arc::new(SnapshotCache::new());
    cache.publish(clusters(&["a"])).await;
    let mut conn = Connection::open(&cache, None);

    conn.send(request(ResourceFamily::Cluster, &[])).await;
    let _ = conn.response().await;

    let mut stale = request(ResourceFamily::Cluster, &[]);
    stale.response_nonce = "not-a-nonce-we-sent".into();
    conn.send(stale).await;

    let status = conn.recv().await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    conn.assert_closed().await;
}

#[tokio::test]
async fn unknown_type_url_closes_only_that_connection() {
    let cache = Arc::new(SnapshotCache::new());
    cache.publish(clusters(&["a"])).await;
    let mut bad = Connection::open(&cache, None);
    let mut good = Connection::open(&cache, None);

    let mut unknown = request(ResourceFamily::Cluster, &[]);
    unknown.type_url = "type.googleapis.com/envoy.config.unknown.v3.Thing".into();
    bad.send(unknown).await;
    assert_eq!(bad.recv().await.unwrap_err().code(), Code::InvalidArgument);
    bad.assert_closed().await;

    good.send(request(ResourceFamily::Cluster, &[])).await;
    assert_eq!(good.response().await.version_info, "1");
}

#[tokio::test]
async fn single_family_service_rejects_other_families() {
    let cache = Arc::new(SnapshotCache::new());
    let mut conn = Connection::open(&cache, Some(ResourceFamily::Cluster));

    conn.send(request(ResourceFamily::Listener, &[])).await;
    assert_eq!(conn.recv().await.unwrap_err().code(), Code::InvalidArgument);
    conn.assert_closed().await;
}

#[tokio::test]
async fn unknown_route_names_get_empty_placeholders() {
    let cache = Arc::new(SnapshotCache::new());
    let mut snapshot = ResourceSnapshot::default();
    let table = RouteConfiguration { name: "ingress_http".into(), ..Default::default() };
    snapshot.routes.insert(
        "ingress_http".into(),
        Any { type_url: ResourceFamily::Route.type_url().into(), value: table.encode_to_vec() },
    );
    cache.publish(snapshot).await;

    let mut conn = Connection::open(&cache, None);
    conn.send(request(ResourceFamily::Route, &["ingress_http", "ingress_other"])).await;

    let response = conn.response().await;
    let names: Vec<String> = response
        .resources
        .iter()
        .map(|any| RouteConfiguration::decode(any.value.as_slice()).unwrap().name)
        .collect();
    assert_eq!(names, vec!["ingress_http", "ingress_other"]);
}

#[tokio::test]
async fn changed_names_after_ack_trigger_a_push() {
    let cache = Arc::new(SnapshotCache::new());
    cache.publish(clusters(&["a"])).await;
    let mut conn = Connection::open(&cache, None);

    conn.send(request(ResourceFamily::Endpoint, &["a"])).await;
    let first = conn.response().await;
    assert_eq!(first.resources.len(), 1, "placeholder for unknown assignment");

    let mut more = ack(ResourceFamily::Endpoint, &first);
    more.resource_names = vec!["a".into(), "b".into()];
    conn.send(more).await;

    let second = conn.response().await;
    assert_eq!(second.version_info, first.version_info);
    assert_eq!(second.resources.len(), 2);
}

#[tokio::test]
async fn names_changed_on_an_acked_nonce_keep_the_stream_open() {
    let cache = Arc::new(SnapshotCache::new());
    cache.publish(clusters(&["a"])).await;
    let mut conn = Connection::open(&cache, None);

    conn.send(request(ResourceFamily::Endpoint, &["a"])).await;
    let first = conn.response().await;
    conn.send(DiscoveryRequest { resource_names: vec!["a".into()], ..ack(ResourceFamily::Endpoint, &first) })
        .await;
    conn.assert_silent().await;

    let mut more = ack(ResourceFamily::Endpoint, &first);
    more.resource_names = vec!["a".into(), "b".into()];
    conn.send(more).await;

    let second = conn.response().await;
    assert_eq!(second.version_info, first.version_info);
    assert_eq!(second.resources.len(), 2);
    assert_ne!(second.nonce, first.nonce);

    let mut same = ack(ResourceFamily::Endpoint, &second);
    same.resource_names = vec!["a".into(), "b".into()];
    conn.send(same.clone()).await;
    conn.send(same).await;
    conn.assert_silent().await;
}

#[tokio::test]
async fn families_on_one_connection_are_independent() {
    let cache = Arc::new(SnapshotCache::new());
    cache.publish(clusters(&["a"])).await;
    let mut conn = Connection::open(&cache, None);

    conn.send(request(ResourceFamily::Listener, &[])).await;
    let listeners = conn.response().await;
    conn.send(request(ResourceFamily::Cluster, &[])).await;
    let clusters_v1 = conn.response().await;
    conn.send(ack(ResourceFamily::Listener, &listeners)).await;
    conn.send(ack(ResourceFamily::Cluster, &clusters_v1)).await;
    conn.assert_silent().await;

    cache.publish(clusters(&["a", "b"])).await;
    let pushed = conn.response().await;
    assert_eq!(pushed.type_url, ResourceFamily::Cluster.type_url());
    conn.assert_silent().await;
}

#[tokio::test]
async fn empty_nonce_re_request_pushes_current_content() {
    let cache = Arc::new(SnapshotCache::new());
    cache.publish(clusters(&["a"])).await;
    let mut conn = Connection::open(&cache, None);

    conn.send(request(ResourceFamily::Cluster, &[])).await;
    let first = conn.response().await;
    conn.send(ack(ResourceFamily::Cluster, &first)).await;

    conn.send(request(ResourceFamily::Cluster, &[])).await;
    let again = conn.response().await;
    assert_eq!(again.version_info, "1");
    assert_ne!(again.nonce, first.nonce);
}

#[tokio::test]
async fn cancellation_ends_the_stream() {
    let cache = Arc::new(SnapshotCache::new());
    let mut conn = Connection::open(&cache, None);
    conn.send(request(ResourceFamily::Cluster, &[])).await;

    conn.cancel.cancel();
    conn.assert_closed().await;
}
