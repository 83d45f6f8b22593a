//! # Dependency Graph
//!
//! The graph builder turns an [`ObjectSnapshot`](crate::domain::ObjectSnapshot)
//! into a fully resolved forest
//! `Listener -> VirtualHost -> Route -> Cluster` plus the TLS secrets the
//! secure virtual hosts need, and an admission status for every routing
//! object.
//!
//! The graph is rebuilt from scratch on every reconcile and never mutated
//! afterwards. Everything is held in sorted containers so two builds of the
//! same snapshot are identical.

pub mod builder;
pub mod conflict;
pub mod matcher;
pub mod validate;

use std::collections::BTreeMap;
use std::time::Duration;

pub use builder::{build, BuildOptions, BuildOutput};
pub use conflict::ConflictPrecedence;
pub use matcher::{specificity_cmp, Matcher};

use crate::domain::{HeadersPolicy, LoadBalancerStrategy, ObjectRef, SocketEndpoint};
use crate::utils::Timeout;

/// Name of the plain HTTP listener and its route table.
pub const HTTP_LISTENER_NAME: &str = "ingress_http";
/// Name of the TLS listener and its route table.
pub const HTTPS_LISTENER_NAME: &str = "ingress_https";

/// Minimum TLS protocol version offered to downstream clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TlsVersion {
    #[default]
    V1_2,
    V1_3,
}

impl TlsVersion {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "1.2" => Some(TlsVersion::V1_2),
            "1.3" => Some(TlsVersion::V1_3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Sorted by name.
    pub listeners: Vec<Listener>,
    pub clusters: BTreeMap<String, Cluster>,
    pub secrets: BTreeMap<String, TlsSecret>,
}

impl DependencyGraph {
    pub fn listener(&self, name: &str) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.name == name)
    }

    /// Look up the virtual host for `(hostname, secure)`.
    pub fn virtual_host(&self, hostname: &str, secure: bool) -> Option<&VirtualHost> {
        self.listeners
            .iter()
            .filter(|l| l.secure == secure)
            .flat_map(|l| l.virtual_hosts.iter())
            .find(|vh| vh.hostname == hostname)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub secure: bool,
    /// Sorted by hostname.
    pub virtual_hosts: Vec<VirtualHost>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualHost {
    pub hostname: String,
    pub port: u16,
    pub tls: Option<VirtualHostTls>,
    /// Most specific first.
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualHostTls {
    /// Name of the secret resource.
    pub secret: String,
    pub minimum_protocol_version: TlsVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub matcher: Matcher,
    pub action: RouteAction,
    /// Object that declared the rule.
    pub owner: ObjectRef,
    /// Index of the rule within its owner.
    pub rule: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    Forward(ForwardAction),
    /// Insecure twin of a TLS-only route.
    HttpsRedirect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardAction {
    pub clusters: Vec<WeightedCluster>,
    pub timeout: Timeout,
    pub idle_timeout: Timeout,
    pub retry: Option<RetrySettings>,
    pub request_headers: HeadersPolicy,
    pub response_headers: HeadersPolicy,
    pub prefix_rewrite: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedCluster {
    pub cluster: String,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    pub count: u32,
    pub per_try_timeout: Timeout,
}

/// Upstream for one `(service, port, strategy)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub name: String,
    pub service: ObjectRef,
    pub port: u16,
    pub load_balancer: LoadBalancerStrategy,
    pub connect_timeout: Duration,
    /// Sorted ready endpoints; may be empty.
    pub endpoints: Vec<SocketEndpoint>,
}

/// Validated certificate material referenced by a secure virtual host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSecret {
    pub name: String,
    pub source: ObjectRef,
    pub certificate: String,
    pub private_key: String,
}

/// Name of the cluster serving `service:port` with `strategy`.
pub fn cluster_name(service: &ObjectRef, port: u16, strategy: LoadBalancerStrategy) -> String {
    match strategy {
        LoadBalancerStrategy::RoundRobin => {
            format!("{}/{}/{}", service.namespace, service.name, port)
        }
        other => format!("{}/{}/{}/{}", service.namespace, service.name, port, other.as_str()),
    }
}

/// Name of the secret resource built from a Secret object.
pub fn secret_name(secret: &ObjectRef) -> String {
    secret.namespaced_name()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_names_carry_strategy_only_when_not_default() {
        let svc = ObjectRef::service("shop", "api");
        assert_eq!(cluster_name(&svc, 80, LoadBalancerStrategy::RoundRobin), "shop/api/80");
        assert_eq!(cluster_name(&svc, 80, LoadBalancerStrategy::Random), "shop/api/80/Random");
    }

    #[test]
    fn tls_versions_order() {
        assert!(TlsVersion::V1_2 < TlsVersion::V1_3);
        assert_eq!(TlsVersion::parse("1.3"), Some(TlsVersion::V1_3));
        assert_eq!(TlsVersion::parse("1.1"), None);
    }
}
