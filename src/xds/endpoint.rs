//! Endpoint assignment translation.

use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, socket_address::PortSpecifier, socket_address::Protocol,
    Address, SocketAddress,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};

use crate::graph::Cluster as ClusterNode;
use crate::Result;

use super::resources::{BuiltResource, ENDPOINT_TYPE_URL};

/// A cluster without ready endpoints gets an assignment with no localities.
pub fn load_assignment_resource(node: &ClusterNode) -> Result<BuiltResource> {
    let lb_endpoints: Vec<LbEndpoint> = node
        .endpoints
        .iter()
        .map(|endpoint| LbEndpoint {
            host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(Endpoint {
                address: Some(Address {
                    address: Some(AddressType::SocketAddress(SocketAddress {
                        address: endpoint.address.clone(),
                        port_specifier: Some(PortSpecifier::PortValue(u32::from(endpoint.port))),
                        protocol: Protocol::Tcp as i32,
                        ..Default::default()
                    })),
                }),
                ..Default::default()
            })),
            ..Default::default()
        })
        .collect();

    let endpoints = if lb_endpoints.is_empty() {
        Vec::new()
    } else {
        vec![LocalityLbEndpoints { lb_endpoints, ..Default::default() }]
    };

    let assignment = ClusterLoadAssignment {
        cluster_name: node.name.clone(),
        endpoints,
        ..Default::default()
    };

    Ok(BuiltResource::new(node.name.clone(), ENDPOINT_TYPE_URL, &assignment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LoadBalancerStrategy, ObjectRef, SocketEndpoint};
    use prost::Message;
    use std::time::Duration;

    fn node(endpoints: Vec<SocketEndpoint>) -> ClusterNode {
        ClusterNode {
            name: "ns/web/80".into(),
            service: ObjectRef::service("ns", "web"),
            port: 80,
            load_balancer: LoadBalancerStrategy::RoundRobin,
            connect_timeout: Duration::from_secs(2),
            endpoints,
        }
    }

    #[test]
    fn ready_endpoints_become_one_locality() {
        let built = load_assignment_resource(&node(vec![
            SocketEndpoint { address: "10.0.0.1".into(), port: 8080 },
            SocketEndpoint { address: "10.0.0.2".into(), port: 8080 },
        ]))
        .unwrap();

        let cla = ClusterLoadAssignment::decode(built.resource.value.as_slice()).unwrap();
        assert_eq!(cla.cluster_name, "ns/web/80");
        assert_eq!(cla.endpoints.len(), 1);
        assert_eq!(cla.endpoints[0].lb_endpoints.len(), 2);
    }

    #[test]
    fn no_endpoints_yields_empty_assignment() {
        let built = load_assignment_resource(&node(Vec::new())).unwrap();
        let cla = ClusterLoadAssignment::decode(built.resource.value.as_slice()).unwrap();
        assert_eq!(cla.cluster_name, "ns/web/80");
        assert!(cla.endpoints.is_empty());
    }
}
