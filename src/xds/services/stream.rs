//! xDS State-of-the-World Streaming Protocol
//!
//! One task per connection drives every resource family the client subscribes
//! to on that connection. Each family carries its own small state machine:
//!
//! - **Subscribe**: the first request for a family records the requested names
//!   (none, or `*`, means wildcard) and pushes the current content. If the
//!   cache has never been published the push waits for the first publish.
//! - **ACK**: a request echoing the last nonce without `error_detail` marks the
//!   pushed version as accepted. A newer cache version, or a change in the
//!   requested names, triggers the next push.
//! - **NACK**: a request echoing the last nonce with `error_detail` keeps the
//!   previously accepted version. The rejected version is never pushed again.
//! - **Cache change**: pushed right away when no response is outstanding,
//!   otherwise held until the client answers. At most one response per family
//!   is in flight.
//! - **Re-request**: an empty nonce on an existing subscription replaces the
//!   names and pushes the current content.
//! - **Update**: a request repeating the last, already answered nonce
//!   replaces the names. A push follows only if the names changed or a newer
//!   version exists.
//!
//! Protocol errors (unknown type URL, a type URL the service does not serve, a
//! nonce that matches neither the outstanding nor the last answered response) end the connection with
//! a gRPC status. Other connections are unaffected. Connection close and
//! server shutdown drop all per-connection state.
//!
//! Named subscriptions for route tables and endpoint assignments always get an
//! answer: names the cache does not hold are answered with an empty resource
//! so the client never waits on a warming resource.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use envoy_types::pb::google::protobuf::Any;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, WatchStream};
use tokio_stream::{Stream, StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::observability::MetricsRecorder;
use crate::xds::cache::{FamilySnapshot, SnapshotCache};
use crate::xds::resources::ResourceFamily;

/// Wildcard resource name.
const WILDCARD: &str = "*";

/// Outgoing response buffer per connection.
const RESPONSE_BUFFER: usize = 100;

/// Per-family subscription state for one connection.
#[derive(Debug, Default)]
struct Subscription {
    names: BTreeSet<String>,
    /// Nonce of the outstanding response, if any.
    pending_nonce: Option<String>,
    /// Nonce of the last response sent, answered or not.
    last_nonce: Option<String>,
    /// Version and names of the last response sent.
    sent_version: u64,
    sent_names: Option<BTreeSet<String>>,
    acked_version: Option<u64>,
    rejected_version: Option<u64>,
}

impl Subscription {
    fn is_wildcard(&self) -> bool {
        self.names.is_empty() || self.names.contains(WILDCARD)
    }

    fn awaiting_ack(&self) -> bool {
        self.pending_nonce.is_some()
    }

    /// Whether the content at `version` should go out now.
    fn wants_push(&self, version: u64) -> bool {
        if version == 0 || self.awaiting_ack() {
            return false;
        }
        let names_changed = self.sent_names.as_ref() != Some(&self.names);
        if names_changed {
            return true;
        }
        version > self.sent_version && self.rejected_version != Some(version)
    }
}

/// What a request meant for its subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Subscribe,
    ReRequest,
    Ack,
    Nack,
    /// Repeat of an already answered nonce, possibly with new names.
    Update,
}

/// Per-connection driver. Owned by a single task, so no locking.
struct StreamState {
    cache: Arc<SnapshotCache>,
    label: Arc<str>,
    /// Family served by a single-family service; `None` for ADS.
    served_family: Option<ResourceFamily>,
    subscriptions: BTreeMap<ResourceFamily, Subscription>,
    metrics: MetricsRecorder,
}

impl StreamState {
    fn resolve_family(&self, type_url: &str) -> Result<ResourceFamily, Status> {
        match self.served_family {
            Some(family) if type_url.is_empty() || type_url == family.type_url() => Ok(family),
            Some(family) => {
                self.metrics.record_xds_protocol_error("wrong_type_url");
                Err(Status::invalid_argument(format!(
                    "type URL {} is not served by the {} service",
                    type_url,
                    family.as_str()
                )))
            }
            None => ResourceFamily::from_type_url(type_url).ok_or_else(|| {
                self.metrics.record_xds_protocol_error("unknown_type_url");
                Status::invalid_argument(format!("unknown type URL {:?}", type_url))
            }),
        }
    }

    /// Apply an incoming request to the subscription state.
    fn handle_request(
        &mut self,
        request: &DiscoveryRequest,
    ) -> Result<(ResourceFamily, RequestKind), Status> {
        let family = self.resolve_family(&request.type_url)?;
        let names: BTreeSet<String> = request.resource_names.iter().cloned().collect();

        let Some(subscription) = self.subscriptions.get_mut(&family) else {
            self.subscriptions.insert(family, Subscription { names, ..Default::default() });
            debug!(family = %family, stream = %self.label, "New subscription");
            return Ok((family, RequestKind::Subscribe));
        };

        if request.response_nonce.is_empty() {
            subscription.names = names;
            subscription.pending_nonce = None;
            subscription.sent_names = None;
            return Ok((family, RequestKind::ReRequest));
        }

        if subscription.pending_nonce.is_none()
            && subscription.last_nonce.as_deref() == Some(request.response_nonce.as_str())
        {
            subscription.names = names;
            debug!(
                type_url = family.type_url(),
                nonce = %request.response_nonce,
                resource_names = ?request.resource_names,
                stream = %self.label,
                "Subscription updated on answered nonce"
            );
            return Ok((family, RequestKind::Update));
        }

        if subscription.pending_nonce.as_deref() != Some(request.response_nonce.as_str()) {
            self.metrics.record_xds_protocol_error("nonce_mismatch");
            return Err(Status::invalid_argument(format!(
                "nonce {} does not match the outstanding {} response",
                request.response_nonce,
                family.as_str()
            )));
        }

        subscription.pending_nonce = None;
        subscription.names = names;

        match request.error_detail.as_ref() {
            None => {
                subscription.acked_version = Some(subscription.sent_version);
                self.metrics.record_xds_ack(family.as_str(), true);
                debug!(
                    type_url = family.type_url(),
                    version = %request.version_info,
                    nonce = %request.response_nonce,
                    stream = %self.label,
                    "[ACK] Envoy accepted response"
                );
                Ok((family, RequestKind::Ack))
            }
            Some(error_detail) => {
                subscription.rejected_version = Some(subscription.sent_version);
                self.metrics.record_xds_ack(family.as_str(), false);
                warn!(
                    type_url = family.type_url(),
                    nonce = %request.response_nonce,
                    rejected_version = subscription.sent_version,
                    accepted_version = ?subscription.acked_version,
                    error_code = error_detail.code,
                    error_message = %error_detail.message,
                    stream = %self.label,
                    "[NACK] Envoy rejected previous response"
                );
                Ok((family, RequestKind::Nack))
            }
        }
    }

    /// Build the next response for `family` if one is due.
    fn next_response(&mut self, family: ResourceFamily, force: bool) -> Option<DiscoveryResponse> {
        let snapshot = self.cache.get(family);
        let subscription = self.subscriptions.get_mut(&family)?;

        let due = if force {
            snapshot.is_published() && !subscription.awaiting_ack()
        } else {
            subscription.wants_push(snapshot.version)
        };
        if !due {
            return None;
        }

        let resources = select_resources(family, &snapshot, subscription);
        let nonce = Uuid::new_v4().to_string();

        subscription.pending_nonce = Some(nonce.clone());
        subscription.last_nonce = Some(nonce.clone());
        subscription.sent_version = snapshot.version;
        subscription.sent_names = Some(subscription.names.clone());

        Some(DiscoveryResponse {
            version_info: snapshot.version_info(),
            resources,
            type_url: family.type_url().to_string(),
            nonce,
            ..Default::default()
        })
    }
}

fn select_resources(
    family: ResourceFamily,
    snapshot: &FamilySnapshot,
    subscription: &Subscription,
) -> Vec<Any> {
    if subscription.is_wildcard() {
        return snapshot.resources.values().cloned().collect();
    }

    subscription
        .names
        .iter()
        .filter_map(|name| {
            snapshot.resources.get(name).cloned().or_else(|| family.placeholder(name))
        })
        .collect()
}

/// Run the State-of-the-World stream loop for one connection.
///
/// `served_family` pins the connection to one family (LDS, RDS, CDS, EDS and
/// SDS services); `None` accepts every family (ADS). The returned stream ends
/// when the client disconnects, a protocol error occurs, or `cancel` fires.
pub fn run_stream<S>(
    cache: Arc<SnapshotCache>,
    mut in_stream: S,
    label: &str,
    served_family: Option<ResourceFamily>,
    cancel: CancellationToken,
) -> ReceiverStream<Result<DiscoveryResponse, Status>>
where
    S: Stream<Item = Result<DiscoveryRequest, Status>> + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(RESPONSE_BUFFER);
    let label: Arc<str> = Arc::from(label);
    let metrics = MetricsRecorder::new();
    let span = info_span!("xds_stream", stream = %label);

    let task = async move {
        metrics.record_xds_connection(true);
        info!(stream = %label, "xDS stream established");

        let mut state = StreamState {
            cache: cache.clone(),
            label: label.clone(),
            served_family,
            subscriptions: BTreeMap::new(),
            metrics: metrics.clone(),
        };
        let mut watches: StreamMap<ResourceFamily, WatchStream<Arc<FamilySnapshot>>> =
            StreamMap::new();

        loop {
            let outgoing = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(stream = %label, "Closing xDS stream for shutdown");
                    break;
                }
                request = in_stream.next() => {
                    match request {
                        Some(Ok(request)) => {
                            debug!(
                                type_url = %request.type_url,
                                version_info = %request.version_info,
                                nonce = %request.response_nonce,
                                resource_names = ?request.resource_names,
                                node_id = ?request.node.as_ref().map(|n| &n.id),
                                stream = %label,
                                "Received discovery request"
                            );
                            match state.handle_request(&request) {
                                Ok((family, kind)) => {
                                    if kind == RequestKind::Subscribe {
                                        watches.insert(
                                            family,
                                            WatchStream::from_changes(cache.subscribe(family)),
                                        );
                                    }
                                    let force = matches!(kind, RequestKind::Subscribe | RequestKind::ReRequest);
                                    state.next_response(family, force)
                                }
                                Err(status) => {
                                    warn!(stream = %label, error = %status.message(), "Closing xDS stream on protocol error");
                                    let _ = tx.send(Err(status)).await;
                                    break;
                                }
                            }
                        }
                        Some(Err(status)) => {
                            warn!(stream = %label, "Error receiving discovery request: {}", status);
                            break;
                        }
                        None => {
                            info!(stream = %label, "xDS stream ended by client");
                            break;
                        }
                    }
                }
                Some((family, _)) = watches.next() => state.next_response(family, false),
            };

            if let Some(response) = outgoing {
                let family = ResourceFamily::from_type_url(&response.type_url);
                info!(
                    type_url = %response.type_url,
                    version = %response.version_info,
                    nonce = %response.nonce,
                    resource_count = response.resources.len(),
                    stream = %label,
                    "Sending discovery response"
                );
                if let Some(family) = family {
                    metrics.record_xds_push(family.as_str(), response.resources.len());
                }
                if tx.send(Ok(response)).await.is_err() {
                    debug!(stream = %label, "Discovery response receiver dropped");
                    break;
                }
            }
        }

        metrics.record_xds_connection(false);
    };
    tokio::spawn(task.instrument(span));

    ReceiverStream::new(rx)
}

/// Answer a unary fetch with the current content of `family`.
pub fn fetch_response(
    cache: &SnapshotCache,
    family: ResourceFamily,
    request: &DiscoveryRequest,
) -> Result<DiscoveryResponse, Status> {
    if !request.type_url.is_empty() && request.type_url != family.type_url() {
        return Err(Status::invalid_argument(format!(
            "type URL {} is not served by the {} service",
            request.type_url,
            family.as_str()
        )));
    }

    let snapshot = cache.get(family);
    if !snapshot.is_published() {
        return Err(Status::unavailable("no configuration has been published yet"));
    }

    let subscription = Subscription {
        names: request.resource_names.iter().cloned().collect(),
        ..Default::default()
    };
    Ok(DiscoveryResponse {
        version_info: snapshot.version_info(),
        resources: select_resources(family, &snapshot, &subscription),
        type_url: family.type_url().to_string(),
        nonce: Uuid::new_v4().to_string(),
        ..Default::default()
    })
}
