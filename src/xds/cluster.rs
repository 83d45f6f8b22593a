//! Cluster translation. Every cluster is EDS-typed and reads its endpoints
//! over ADS under its own name.

use envoy_types::pb::envoy::config::cluster::v3::cluster::{
    ClusterDiscoveryType, DiscoveryType, EdsClusterConfig, LbPolicy,
};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;

use crate::domain::LoadBalancerStrategy;
use crate::graph::Cluster as ClusterNode;
use crate::utils::proto_duration;
use crate::Result;

use super::resources::{ads_config_source, BuiltResource, CLUSTER_TYPE_URL};

pub fn cluster_resource(node: &ClusterNode) -> Result<BuiltResource> {
    let cluster = Cluster {
        name: node.name.clone(),
        alt_stat_name: node.name.replace('/', "_"),
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::Eds as i32)),
        eds_cluster_config: Some(EdsClusterConfig {
            eds_config: Some(ads_config_source()),
            service_name: node.name.clone(),
        }),
        connect_timeout: Some(proto_duration(node.connect_timeout)),
        lb_policy: lb_policy(node.load_balancer) as i32,
        ..Default::default()
    };

    Ok(BuiltResource::new(node.name.clone(), CLUSTER_TYPE_URL, &cluster))
}

fn lb_policy(strategy: LoadBalancerStrategy) -> LbPolicy {
    match strategy {
        LoadBalancerStrategy::RoundRobin => LbPolicy::RoundRobin,
        LoadBalancerStrategy::LeastRequest => LbPolicy::LeastRequest,
        LoadBalancerStrategy::Random => LbPolicy::Random,
    }
}
