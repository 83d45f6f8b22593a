//! Listener translation.
//!
//! `ingress_http` carries a single filter chain. `ingress_https` has a TLS
//! inspector and one filter chain per secure virtual host, selected by SNI.
//! Both hand routing to RDS over ADS with a route table named after the
//! listener.

use std::net::IpAddr;

use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, socket_address::PortSpecifier,
    transport_socket::ConfigType as TransportSocketConfigType, Address, Http1ProtocolOptions,
    HttpProtocolOptions, SocketAddress, TransportSocket,
};
use envoy_types::pb::envoy::config::listener::v3::{
    filter::ConfigType as FilterConfigType,
    listener::{connection_balance_config, ConnectionBalanceConfig},
    listener_filter::ConfigType as ListenerFilterConfigType,
    Filter, FilterChain, FilterChainMatch, Listener, ListenerFilter,
};
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier},
    http_filter::ConfigType as HttpFilterConfigType,
    HttpConnectionManager, HttpFilter, Rds,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    CommonTlsContext, DownstreamTlsContext, SdsSecretConfig, TlsParameters,
};
use envoy_types::pb::google::protobuf::{Any, BoolValue};

use crate::config::HttpVersion;
use crate::graph::{Listener as ListenerNode, TlsVersion, VirtualHost};
use crate::{Error, Result};

use super::resources::{ads_config_source, any_from_message, BuiltResource, TranslateOptions, LISTENER_TYPE_URL};

pub const HTTP_CONNECTION_MANAGER_FILTER: &str = "envoy.filters.network.http_connection_manager";
pub const ROUTER_FILTER: &str = "envoy.filters.http.router";
pub const TLS_INSPECTOR_FILTER: &str = "envoy.filters.listener.tls_inspector";
pub const TLS_TRANSPORT_SOCKET: &str = "envoy.transport_sockets.tls";

const HCM_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
const ROUTER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
const TLS_INSPECTOR_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector";
const DOWNSTREAM_TLS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";

// TlsParameters.TlsProtocol
const TLS_PROTOCOL_V1_2: i32 = 3;
const TLS_PROTOCOL_V1_3: i32 = 4;

pub fn listener_resource(node: &ListenerNode, options: &TranslateOptions) -> Result<BuiltResource> {
    let address = socket_address(&node.address, node.port)?;

    let filter_chains = if node.secure {
        node.virtual_hosts
            .iter()
            .map(|vhost| secure_filter_chain(node, vhost, options))
            .collect::<Result<Vec<_>>>()?
    } else {
        vec![FilterChain {
            filters: vec![http_connection_manager(&node.name, options)],
            ..Default::default()
        }]
    };

    let listener_filters = if node.secure {
        vec![ListenerFilter {
            name: TLS_INSPECTOR_FILTER.to_string(),
            config_type: Some(ListenerFilterConfigType::TypedConfig(Any {
                type_url: TLS_INSPECTOR_TYPE_URL.to_string(),
                value: Vec::new(),
            })),
            ..Default::default()
        }]
    } else {
        Vec::new()
    };

    let connection_balance_config = options.exact_balancer.then(|| ConnectionBalanceConfig {
        balance_type: Some(connection_balance_config::BalanceType::ExactBalance(
            connection_balance_config::ExactBalance {},
        )),
    });

    let listener = Listener {
        name: node.name.clone(),
        address: Some(address),
        filter_chains,
        listener_filters,
        connection_balance_config,
        ..Default::default()
    };

    Ok(BuiltResource::new(node.name.clone(), LISTENER_TYPE_URL, &listener))
}

fn socket_address(address: &str, port: u16) -> Result<Address> {
    address
        .parse::<IpAddr>()
        .map_err(|e| Error::validation(format!("Invalid listener address '{}': {}", address, e)))?;

    Ok(Address {
        address: Some(AddressType::SocketAddress(SocketAddress {
            address: address.to_string(),
            port_specifier: Some(PortSpecifier::PortValue(u32::from(port))),
            ..Default::default()
        })),
    })
}

fn secure_filter_chain(
    node: &ListenerNode,
    vhost: &VirtualHost,
    options: &TranslateOptions,
) -> Result<FilterChain> {
    let tls = vhost.tls.as_ref().ok_or_else(|| {
        Error::internal(format!("Secure virtual host {} has no certificate", vhost.hostname))
    })?;

    let tls_params = TlsParameters {
        tls_minimum_protocol_version: match tls.minimum_protocol_version {
            TlsVersion::V1_2 => TLS_PROTOCOL_V1_2,
            TlsVersion::V1_3 => TLS_PROTOCOL_V1_3,
        },
        tls_maximum_protocol_version: TLS_PROTOCOL_V1_3,
        ..Default::default()
    };

    let downstream = DownstreamTlsContext {
        common_tls_context: Some(CommonTlsContext {
            tls_params: Some(tls_params),
            tls_certificate_sds_secret_configs: vec![SdsSecretConfig {
                name: tls.secret.clone(),
                sds_config: Some(ads_config_source()),
            }],
            alpn_protocols: alpn_protocols(&options.http_versions),
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(FilterChain {
        filter_chain_match: Some(FilterChainMatch {
            server_names: vec![vhost.hostname.clone()],
            ..Default::default()
        }),
        filters: vec![http_connection_manager(&node.name, options)],
        transport_socket: Some(TransportSocket {
            name: TLS_TRANSPORT_SOCKET.to_string(),
            config_type: Some(TransportSocketConfigType::TypedConfig(any_from_message(
                DOWNSTREAM_TLS_TYPE_URL,
                &downstream,
            ))),
        }),
        ..Default::default()
    })
}

fn alpn_protocols(versions: &[HttpVersion]) -> Vec<String> {
    let h1 = versions.is_empty() || versions.contains(&HttpVersion::Http1);
    let h2 = versions.is_empty() || versions.contains(&HttpVersion::Http2);
    let mut protocols = Vec::with_capacity(2);
    if h2 {
        protocols.push("h2".to_string());
    }
    if h1 {
        protocols.push("http/1.1".to_string());
    }
    protocols
}

fn codec_type(versions: &[HttpVersion]) -> CodecType {
    let h1 = versions.contains(&HttpVersion::Http1);
    let h2 = versions.contains(&HttpVersion::Http2);
    match (h1, h2) {
        (true, false) => CodecType::Http1,
        (false, true) => CodecType::Http2,
        _ => CodecType::Auto,
    }
}

/// HTTP connection manager fetching the route table `route_table` over ADS.
fn http_connection_manager(route_table: &str, options: &TranslateOptions) -> Filter {
    let router = HttpFilter {
        name: ROUTER_FILTER.to_string(),
        config_type: Some(HttpFilterConfigType::TypedConfig(any_from_message(
            ROUTER_TYPE_URL,
            &Router::default(),
        ))),
        ..Default::default()
    };

    let common_http_protocol_options = HttpProtocolOptions {
        idle_timeout: options.connection_idle_timeout.to_proto(),
        max_connection_duration: options.max_connection_duration.to_proto(),
        ..Default::default()
    };

    let hcm = HttpConnectionManager {
        stat_prefix: route_table.to_string(),
        codec_type: codec_type(&options.http_versions) as i32,
        route_specifier: Some(RouteSpecifier::Rds(Rds {
            config_source: Some(ads_config_source()),
            route_config_name: route_table.to_string(),
        })),
        http_filters: vec![router],
        common_http_protocol_options: Some(common_http_protocol_options),
        http_protocol_options: Some(Http1ProtocolOptions {
            allow_chunked_length: options.allow_chunked_length,
            ..Default::default()
        }),
        request_timeout: options.request_timeout.to_proto(),
        stream_idle_timeout: options.stream_idle_timeout.to_proto(),
        delayed_close_timeout: options.delayed_close_timeout.to_proto(),
        drain_timeout: options.drain_timeout.to_proto(),
        use_remote_address: Some(BoolValue { value: true }),
        xff_num_trusted_hops: options.num_trusted_hops,
        merge_slashes: options.merge_slashes,
        normalize_path: Some(BoolValue { value: true }),
        ..Default::default()
    };

    Filter {
        name: HTTP_CONNECTION_MANAGER_FILTER.to_string(),
        config_type: Some(FilterConfigType::TypedConfig(any_from_message(HCM_TYPE_URL, &hcm))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::VirtualHostTls;
    use prost::Message;
    use std::time::Duration;

    use crate::utils::Timeout;

    fn decode(built: &BuiltResource) -> Listener {
        Listener::decode(built.resource.value.as_slice()).expect("listener decodes")
    }

    fn hcm(filter: &Filter) -> HttpConnectionManager {
        match filter.config_type.as_ref() {
            Some(FilterConfigType::TypedConfig(any)) => {
                HttpConnectionManager::decode(any.value.as_slice()).expect("hcm decodes")
            }
            other => panic!("unexpected filter config {:?}", other),
        }
    }

    fn http_node() -> ListenerNode {
        ListenerNode {
            name: "ingress_http".into(),
            address: "0.0.0.0".into(),
            port: 8080,
            secure: false,
            virtual_hosts: Vec::new(),
        }
    }

    #[test]
    fn http_listener_uses_rds_over_ads() {
        let options = TranslateOptions {
            connection_idle_timeout: Timeout::After(Duration::from_secs(60)),
            num_trusted_hops: 2,
            ..Default::default()
        };
        let built = listener_resource(&http_node(), &options).unwrap();
        assert_eq!(built.name, "ingress_http");
        assert_eq!(built.resource.type_url, LISTENER_TYPE_URL);

        let listener = decode(&built);
        assert_eq!(listener.filter_chains.len(), 1);
        assert!(listener.listener_filters.is_empty());

        let manager = hcm(&listener.filter_chains[0].filters[0]);
        match manager.route_specifier {
            Some(RouteSpecifier::Rds(rds)) => assert_eq!(rds.route_config_name, "ingress_http"),
            other => panic!("expected RDS, got {:?}", other),
        }
        assert_eq!(manager.http_filters[0].name, ROUTER_FILTER);
        assert_eq!(manager.xff_num_trusted_hops, 2);
        assert_eq!(
            manager.common_http_protocol_options.unwrap().idle_timeout.unwrap().seconds,
            60
        );
    }

    #[test]
    fn https_listener_has_one_sni_chain_per_host() {
        let vhost = |host: &str| VirtualHost {
            hostname: host.into(),
            port: 8443,
            tls: Some(VirtualHostTls {
                secret: format!("ns/{}", host),
                minimum_protocol_version: TlsVersion::V1_3,
            }),
            routes: Vec::new(),
        };
        let node = ListenerNode {
            name: "ingress_https".into(),
            address: "0.0.0.0".into(),
            port: 8443,
            secure: true,
            virtual_hosts: vec![vhost("a.example.com"), vhost("b.example.com")],
        };

        let listener = decode(&listener_resource(&node, &TranslateOptions::default()).unwrap());
        assert_eq!(listener.listener_filters[0].name, TLS_INSPECTOR_FILTER);
        assert_eq!(listener.filter_chains.len(), 2);

        let chain = &listener.filter_chains[0];
        assert_eq!(chain.filter_chain_match.as_ref().unwrap().server_names, vec!["a.example.com"]);

        let socket = chain.transport_socket.as_ref().unwrap();
        let context = match socket.config_type.as_ref() {
            Some(TransportSocketConfigType::TypedConfig(any)) => {
                DownstreamTlsContext::decode(any.value.as_slice()).unwrap()
            }
            _ => panic!("missing tls context"),
        };
        let common = context.common_tls_context.unwrap();
        assert_eq!(common.tls_certificate_sds_secret_configs[0].name, "ns/a.example.com");
        assert_eq!(common.tls_params.unwrap().tls_minimum_protocol_version, TLS_PROTOCOL_V1_3);
    }

    #[test]
    fn exact_balancer_and_codec_follow_options() {
        let options = TranslateOptions {
            exact_balancer: true,
            http_versions: vec![HttpVersion::Http1],
            ..Default::default()
        };
        let listener = decode(&listener_resource(&http_node(), &options).unwrap());
        assert!(listener.connection_balance_config.is_some());
        let manager = hcm(&listener.filter_chains[0].filters[0]);
        assert_eq!(manager.codec_type, CodecType::Http1 as i32);
    }

    #[test]
    fn invalid_address_is_an_error() {
        let mut node = http_node();
        node.address = "not-an-ip".into();
        assert!(listener_resource(&node, &TranslateOptions::default()).is_err());
    }
}
