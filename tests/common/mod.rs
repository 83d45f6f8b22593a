//! Shared fixtures for integration tests.
#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use gateplane::domain::{
    BackendRef, EndpointPort, EndpointSubset, Endpoints, ObjectMeta, RouteMatch, RouteRule,
    RoutingObject, Secret, Service, TlsSpec,
};

pub fn meta(ns: &str, name: &str, created: i64) -> ObjectMeta {
    ObjectMeta::new(ns, name).created_at(Utc.timestamp_opt(created, 0).unwrap())
}

pub fn service(ns: &str, name: &str, port: u16) -> Service {
    Service::new(ObjectMeta::new(ns, name)).with_port("http", port)
}

pub fn endpoints(ns: &str, name: &str, addresses: &[&str], port: u16) -> Endpoints {
    Endpoints::new(ObjectMeta::new(ns, name)).with_subset(EndpointSubset {
        addresses: addresses.iter().map(|a| a.to_string()).collect(),
        not_ready_addresses: Vec::new(),
        ports: vec![EndpointPort { name: "http".into(), port }],
    })
}

pub fn prefix_rule(path: &str, service: &str, port: u16) -> RouteRule {
    RouteRule::new(RouteMatch::prefix(path), vec![BackendRef::new(service, port)])
}

pub fn root(meta: ObjectMeta, host: &str) -> RoutingObject {
    RoutingObject::new(meta).with_hostname(host)
}

pub fn tls(secret: &str) -> TlsSpec {
    TlsSpec { secret_name: secret.into(), ..Default::default() }
}

/// Self-signed certificate and matching key for `host`.
pub fn tls_secret(ns: &str, name: &str, host: &str) -> Secret {
    let certified =
        rcgen::generate_simple_self_signed(vec![host.to_string()]).expect("self-signed certificate");
    Secret::new(ObjectMeta::new(ns, name), certified.cert.pem(), certified.key_pair.serialize_pem())
}
