//! Resource families, resource sets and the graph-to-Envoy translation entry
//! point.

use std::collections::BTreeMap;
use std::fmt;

use envoy_types::pb::envoy::config::core::v3::{
    config_source::ConfigSourceSpecifier, AggregatedConfigSource, ApiVersion, ConfigSource,
};
use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use envoy_types::pb::google::protobuf::Any;
use prost::Message;
use tracing::{debug, warn};

use crate::config::{Config, HttpVersion};
use crate::domain::HeadersPolicy;
use crate::graph::DependencyGraph;
use crate::utils::Timeout;
use crate::Result;

use super::{cluster, endpoint, listener, route, secret};

pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
pub const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

/// The five resource families served over xDS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceFamily {
    Listener,
    Route,
    Cluster,
    Endpoint,
    Secret,
}

impl ResourceFamily {
    pub const ALL: [ResourceFamily; 5] = [
        ResourceFamily::Listener,
        ResourceFamily::Route,
        ResourceFamily::Cluster,
        ResourceFamily::Endpoint,
        ResourceFamily::Secret,
    ];

    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceFamily::Listener => LISTENER_TYPE_URL,
            ResourceFamily::Route => ROUTE_TYPE_URL,
            ResourceFamily::Cluster => CLUSTER_TYPE_URL,
            ResourceFamily::Endpoint => ENDPOINT_TYPE_URL,
            ResourceFamily::Secret => SECRET_TYPE_URL,
        }
    }

    pub fn from_type_url(type_url: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|family| family.type_url() == type_url)
    }

    /// Short discovery service name, used as a metrics and log label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceFamily::Listener => "lds",
            ResourceFamily::Route => "rds",
            ResourceFamily::Cluster => "cds",
            ResourceFamily::Endpoint => "eds",
            ResourceFamily::Secret => "sds",
        }
    }

    /// Empty stand-in returned for a requested name that does not exist.
    /// Only route tables and endpoint assignments have one.
    pub fn placeholder(&self, name: &str) -> Option<Any> {
        match self {
            ResourceFamily::Route => Some(any_from_message(
                ROUTE_TYPE_URL,
                &RouteConfiguration { name: name.to_string(), ..Default::default() },
            )),
            ResourceFamily::Endpoint => Some(any_from_message(
                ENDPOINT_TYPE_URL,
                &ClusterLoadAssignment { cluster_name: name.to_string(), ..Default::default() },
            )),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name-ordered set of encoded resources of one family.
pub type ResourceSet = BTreeMap<String, Any>;

/// One immutable set per family, as produced by a single translation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSnapshot {
    pub listeners: ResourceSet,
    pub routes: ResourceSet,
    pub clusters: ResourceSet,
    pub endpoints: ResourceSet,
    pub secrets: ResourceSet,
}

impl ResourceSnapshot {
    pub fn family(&self, family: ResourceFamily) -> &ResourceSet {
        match family {
            ResourceFamily::Listener => &self.listeners,
            ResourceFamily::Route => &self.routes,
            ResourceFamily::Cluster => &self.clusters,
            ResourceFamily::Endpoint => &self.endpoints,
            ResourceFamily::Secret => &self.secrets,
        }
    }

    fn family_mut(&mut self, family: ResourceFamily) -> &mut ResourceSet {
        match family {
            ResourceFamily::Listener => &mut self.listeners,
            ResourceFamily::Route => &mut self.routes,
            ResourceFamily::Cluster => &mut self.clusters,
            ResourceFamily::Endpoint => &mut self.endpoints,
            ResourceFamily::Secret => &mut self.secrets,
        }
    }

    pub fn into_families(self) -> [(ResourceFamily, ResourceSet); 5] {
        [
            (ResourceFamily::Listener, self.listeners),
            (ResourceFamily::Route, self.routes),
            (ResourceFamily::Cluster, self.clusters),
            (ResourceFamily::Endpoint, self.endpoints),
            (ResourceFamily::Secret, self.secrets),
        ]
    }

    pub fn resource_count(&self) -> usize {
        ResourceFamily::ALL.iter().map(|f| self.family(*f).len()).sum()
    }
}

/// Wrapper for a built Envoy resource along with its name.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltResource {
    pub name: String,
    pub resource: Any,
}

impl BuiltResource {
    pub fn new<M: Message>(name: impl Into<String>, type_url: &str, message: &M) -> Self {
        Self { name: name.into(), resource: any_from_message(type_url, message) }
    }
}

pub fn any_from_message<M: Message>(type_url: &str, message: &M) -> Any {
    Any { type_url: type_url.to_string(), value: message.encode_to_vec() }
}

/// Config source pointing back at this server over ADS.
pub fn ads_config_source() -> ConfigSource {
    ConfigSource {
        config_source_specifier: Some(ConfigSourceSpecifier::Ads(AggregatedConfigSource::default())),
        resource_api_version: ApiVersion::V3 as i32,
        ..Default::default()
    }
}

/// Proxy-wide settings applied while translating.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslateOptions {
    pub request_timeout: Timeout,
    pub connection_idle_timeout: Timeout,
    pub stream_idle_timeout: Timeout,
    pub max_connection_duration: Timeout,
    pub delayed_close_timeout: Timeout,
    pub drain_timeout: Timeout,
    pub num_trusted_hops: u32,
    pub merge_slashes: bool,
    pub allow_chunked_length: bool,
    pub http_versions: Vec<HttpVersion>,
    pub exact_balancer: bool,
    pub request_headers: HeadersPolicy,
    pub response_headers: HeadersPolicy,
}

impl TranslateOptions {
    /// Timeouts were checked when the config was validated; a value that no
    /// longer parses falls back to the proxy default.
    pub fn from_config(config: &Config) -> Self {
        let timeout = |value: &str| Timeout::parse(value).unwrap_or_default();
        let timeouts = &config.timeouts;

        Self {
            request_timeout: timeout(&timeouts.request),
            connection_idle_timeout: timeout(&timeouts.connection_idle),
            stream_idle_timeout: timeout(&timeouts.stream_idle),
            max_connection_duration: timeout(&timeouts.max_connection_duration),
            delayed_close_timeout: timeout(&timeouts.delayed_close),
            drain_timeout: timeout(&timeouts.connection_shutdown_grace_period),
            num_trusted_hops: config.network.num_trusted_hops,
            merge_slashes: !config.disable_merge_slashes,
            allow_chunked_length: !config.disable_allow_chunked_length,
            http_versions: config.default_http_versions.clone(),
            exact_balancer: config.listeners.connection_balancer == "exact",
            request_headers: config.policy.request_headers.clone(),
            response_headers: config.policy.response_headers.clone(),
        }
    }
}

/// Translate a dependency graph into the five resource sets.
///
/// A resource that fails to build is logged and left out; the rest of the
/// snapshot is still produced.
pub fn translate(graph: &DependencyGraph, options: &TranslateOptions) -> ResourceSnapshot {
    let mut snapshot = ResourceSnapshot::default();

    for node in &graph.listeners {
        insert(&mut snapshot, ResourceFamily::Listener, listener::listener_resource(node, options));
        insert(&mut snapshot, ResourceFamily::Route, route::route_table_resource(node, options));
    }

    for node in graph.clusters.values() {
        insert(&mut snapshot, ResourceFamily::Cluster, cluster::cluster_resource(node));
        insert(&mut snapshot, ResourceFamily::Endpoint, endpoint::load_assignment_resource(node));
    }

    for node in graph.secrets.values() {
        insert(&mut snapshot, ResourceFamily::Secret, secret::secret_resource(node));
    }

    debug!(
        listeners = snapshot.listeners.len(),
        routes = snapshot.routes.len(),
        clusters = snapshot.clusters.len(),
        endpoints = snapshot.endpoints.len(),
        secrets = snapshot.secrets.len(),
        "Translated dependency graph"
    );

    snapshot
}

fn insert(snapshot: &mut ResourceSnapshot, family: ResourceFamily, built: Result<BuiltResource>) {
    match built {
        Ok(built) => {
            snapshot.family_mut(family).insert(built.name, built.resource);
        }
        Err(e) => {
            warn!(family = %family, error = %e, "Failed to build resource, skipping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_urls_round_trip() {
        for family in ResourceFamily::ALL {
            assert_eq!(ResourceFamily::from_type_url(family.type_url()), Some(family));
        }
        assert_eq!(ResourceFamily::from_type_url("type.googleapis.com/unknown"), None);
    }

    #[test]
    fn placeholders_exist_for_routes_and_endpoints_only() {
        let route = ResourceFamily::Route.placeholder("ingress_http").expect("route placeholder");
        let decoded = RouteConfiguration::decode(route.value.as_slice()).unwrap();
        assert_eq!(decoded.name, "ingress_http");
        assert!(decoded.virtual_hosts.is_empty());

        let cla = ResourceFamily::Endpoint.placeholder("ns/web/80").expect("eds placeholder");
        let decoded = ClusterLoadAssignment::decode(cla.value.as_slice()).unwrap();
        assert_eq!(decoded.cluster_name, "ns/web/80");

        assert!(ResourceFamily::Cluster.placeholder("x").is_none());
        assert!(ResourceFamily::Listener.placeholder("x").is_none());
        assert!(ResourceFamily::Secret.placeholder("x").is_none());
    }

    #[test]
    fn empty_graph_still_has_http_listener_when_present() {
        let graph = DependencyGraph {
            listeners: vec![crate::graph::Listener {
                name: crate::graph::HTTP_LISTENER_NAME.into(),
                address: "0.0.0.0".into(),
                port: 8080,
                secure: false,
                virtual_hosts: Vec::new(),
            }],
            ..Default::default()
        };
        let snapshot = translate(&graph, &TranslateOptions::default());
        assert!(snapshot.listeners.contains_key("ingress_http"));
        assert!(snapshot.routes.contains_key("ingress_http"));
        assert!(snapshot.clusters.is_empty());
    }

    #[test]
    fn options_follow_config_defaults() {
        let options = TranslateOptions::from_config(&Config::default());
        assert_eq!(
            options.connection_idle_timeout,
            Timeout::After(std::time::Duration::from_secs(60))
        );
        assert!(options.merge_slashes);
        assert!(options.allow_chunked_length);
        assert!(!options.exact_balancer);
    }
}
