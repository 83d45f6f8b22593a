//! Route table translation: one `RouteConfiguration` per listener, one Envoy
//! virtual host per graph virtual host, routes in graph order.

use envoy_types::pb::envoy::config::core::v3::{
    header_value_option::HeaderAppendAction, HeaderValue, HeaderValueOption,
};
use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier,
    query_parameter_matcher::QueryParameterMatchSpecifier,
    redirect_action::{RedirectResponseCode, SchemeRewriteSpecifier},
    route::Action,
    route_action::ClusterSpecifier,
    route_match::PathSpecifier,
    weighted_cluster::ClusterWeight,
    HeaderMatcher as EnvoyHeaderMatcher, QueryParameterMatcher, RedirectAction, RetryPolicy, Route,
    RouteAction, RouteConfiguration, RouteMatch, VirtualHost as EnvoyVirtualHost, WeightedCluster,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{
    string_matcher::MatchPattern, RegexMatcher, StringMatcher,
};
use envoy_types::pb::google::protobuf::UInt32Value;

use crate::domain::{HeaderMatcher, HeadersPolicy, PathMatch, QueryParamMatch};
use crate::graph::{ForwardAction, Listener, Matcher, Route as RouteNode, RouteAction as RouteNodeAction, VirtualHost};
use crate::Result;

use super::resources::{BuiltResource, TranslateOptions, ROUTE_TYPE_URL};

/// Retried on gateway errors and resets, as Envoy's `5xx` policy.
const RETRY_ON: &str = "5xx";

pub fn route_table_resource(listener: &Listener, options: &TranslateOptions) -> Result<BuiltResource> {
    let (request_headers_to_add, request_headers_to_remove) = header_mutations(&options.request_headers);
    let (response_headers_to_add, response_headers_to_remove) =
        header_mutations(&options.response_headers);

    let route_config = RouteConfiguration {
        name: listener.name.clone(),
        virtual_hosts: listener.virtual_hosts.iter().map(virtual_host).collect(),
        request_headers_to_add,
        request_headers_to_remove,
        response_headers_to_add,
        response_headers_to_remove,
        ..Default::default()
    };

    Ok(BuiltResource::new(listener.name.clone(), ROUTE_TYPE_URL, &route_config))
}

fn virtual_host(vhost: &VirtualHost) -> EnvoyVirtualHost {
    EnvoyVirtualHost {
        name: vhost.hostname.clone(),
        domains: vec![vhost.hostname.clone()],
        routes: vhost.routes.iter().map(route).collect(),
        ..Default::default()
    }
}

fn route(node: &RouteNode) -> Route {
    let mut route = Route {
        name: format!("{}/{}", node.owner.namespaced_name(), node.rule),
        r#match: Some(route_match(&node.matcher)),
        ..Default::default()
    };

    match &node.action {
        RouteNodeAction::Forward(forward) => {
            let (req_add, req_remove) = header_mutations(&forward.request_headers);
            let (resp_add, resp_remove) = header_mutations(&forward.response_headers);
            route.request_headers_to_add = req_add;
            route.request_headers_to_remove = req_remove;
            route.response_headers_to_add = resp_add;
            route.response_headers_to_remove = resp_remove;
            route.action = Some(Action::Route(route_action(forward)));
        }
        RouteNodeAction::HttpsRedirect => {
            route.action = Some(Action::Redirect(RedirectAction {
                scheme_rewrite_specifier: Some(SchemeRewriteSpecifier::HttpsRedirect(true)),
                response_code: RedirectResponseCode::MovedPermanently as i32,
                ..Default::default()
            }));
        }
    }

    route
}

fn route_match(matcher: &Matcher) -> RouteMatch {
    let path_specifier = match &matcher.path {
        PathMatch::Exact(path) => PathSpecifier::Path(path.clone()),
        PathMatch::Prefix(prefix) => PathSpecifier::Prefix(prefix.clone()),
        PathMatch::Regex(regex) => PathSpecifier::SafeRegex(regex_matcher(regex)),
    };

    RouteMatch {
        path_specifier: Some(path_specifier),
        headers: matcher
            .headers
            .iter()
            .map(|(name, header)| header_matcher(name, header))
            .collect(),
        query_parameters: matcher.query_params.iter().map(query_matcher).collect(),
        ..Default::default()
    }
}

fn regex_matcher(regex: &str) -> RegexMatcher {
    RegexMatcher { regex: regex.to_string(), ..Default::default() }
}

fn string_matcher(pattern: MatchPattern) -> StringMatcher {
    StringMatcher { match_pattern: Some(pattern), ..Default::default() }
}

fn header_matcher(name: &str, header: &HeaderMatcher) -> EnvoyHeaderMatcher {
    let specifier = match header {
        HeaderMatcher::Exact(value) => {
            HeaderMatchSpecifier::StringMatch(string_matcher(MatchPattern::Exact(value.clone())))
        }
        HeaderMatcher::Contains(value) => {
            HeaderMatchSpecifier::StringMatch(string_matcher(MatchPattern::Contains(value.clone())))
        }
        HeaderMatcher::Regex(regex) => HeaderMatchSpecifier::StringMatch(string_matcher(
            MatchPattern::SafeRegex(regex_matcher(regex)),
        )),
        HeaderMatcher::Present => HeaderMatchSpecifier::PresentMatch(true),
    };

    EnvoyHeaderMatcher {
        name: name.to_string(),
        header_match_specifier: Some(specifier),
        ..Default::default()
    }
}

fn query_matcher(param: &QueryParamMatch) -> QueryParameterMatcher {
    let specifier = if param.value.is_empty() {
        QueryParameterMatchSpecifier::PresentMatch(true)
    } else {
        QueryParameterMatchSpecifier::StringMatch(string_matcher(MatchPattern::Exact(
            param.value.clone(),
        )))
    };

    QueryParameterMatcher {
        name: param.name.clone(),
        query_parameter_match_specifier: Some(specifier),
        ..Default::default()
    }
}

fn route_action(forward: &ForwardAction) -> RouteAction {
    let cluster_specifier = match forward.clusters.as_slice() {
        [single] => ClusterSpecifier::Cluster(single.cluster.clone()),
        many => ClusterSpecifier::WeightedClusters(WeightedCluster {
            clusters: many
                .iter()
                .map(|wc| ClusterWeight {
                    name: wc.cluster.clone(),
                    weight: Some(UInt32Value { value: wc.weight }),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
    };

    let retry_policy = forward.retry.as_ref().map(|retry| RetryPolicy {
        retry_on: RETRY_ON.to_string(),
        num_retries: (retry.count > 0).then_some(UInt32Value { value: retry.count }),
        per_try_timeout: retry.per_try_timeout.to_proto(),
        ..Default::default()
    });

    #[allow(deprecated)]
    let action = RouteAction {
        cluster_specifier: Some(cluster_specifier),
        timeout: forward.timeout.to_proto(),
        idle_timeout: forward.idle_timeout.to_proto(),
        retry_policy,
        prefix_rewrite: forward.prefix_rewrite.clone().unwrap_or_default(),
        ..Default::default()
    };

    action
}

fn header_mutations(policy: &HeadersPolicy) -> (Vec<HeaderValueOption>, Vec<String>) {
    let add = policy
        .set
        .iter()
        .map(|(key, value)| HeaderValueOption {
            header: Some(HeaderValue { key: key.clone(), value: value.clone(), ..Default::default() }),
            append_action: HeaderAppendAction::OverwriteIfExistsOrAdd as i32,
            ..Default::default()
        })
        .collect();

    (add, policy.remove.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ObjectRef;
    use crate::graph::WeightedCluster as WeightedNode;
    use crate::utils::Timeout;
    use prost::Message;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn forward(clusters: Vec<(&str, u32)>) -> ForwardAction {
        ForwardAction {
            clusters: clusters
                .into_iter()
                .map(|(cluster, weight)| WeightedNode { cluster: cluster.into(), weight })
                .collect(),
            timeout: Timeout::Default,
            idle_timeout: Timeout::Default,
            retry: None,
            request_headers: HeadersPolicy::default(),
            response_headers: HeadersPolicy::default(),
            prefix_rewrite: None,
        }
    }

    fn listener(routes: Vec<RouteNode>) -> Listener {
        Listener {
            name: "ingress_http".into(),
            address: "0.0.0.0".into(),
            port: 8080,
            secure: false,
            virtual_hosts: vec![VirtualHost {
                hostname: "x.example.com".into(),
                port: 8080,
                tls: None,
                routes,
            }],
        }
    }

    fn node(matcher: Matcher, action: RouteNodeAction) -> RouteNode {
        RouteNode { matcher, action, owner: ObjectRef::routing_object("ns", "web"), rule: 0 }
    }

    fn decode(built: &BuiltResource) -> RouteConfiguration {
        RouteConfiguration::decode(built.resource.value.as_slice()).expect("route decodes")
    }

    #[test]
    fn single_cluster_route_with_matchers() {
        let matcher = Matcher::from_route_match(
            &crate::domain::RouteMatch::prefix("/api")
                .with_header(crate::domain::HeaderMatch::present("x-canary"))
                .with_query_param("debug", "1"),
        );
        let mut action = forward(vec![("ns/api/80", 1)]);
        action.timeout = Timeout::Infinite;

        let built = route_table_resource(
            &listener(vec![node(matcher, RouteNodeAction::Forward(action))]),
            &TranslateOptions::default(),
        )
        .unwrap();
        assert_eq!(built.name, "ingress_http");

        let config = decode(&built);
        let vhost = &config.virtual_hosts[0];
        assert_eq!(vhost.domains, vec!["x.example.com"]);

        let route = &vhost.routes[0];
        assert_eq!(route.name, "ns/web/0");
        let m = route.r#match.as_ref().unwrap();
        assert_eq!(m.path_specifier, Some(PathSpecifier::Prefix("/api".into())));
        assert_eq!(m.headers[0].header_match_specifier, Some(HeaderMatchSpecifier::PresentMatch(true)));
        assert_eq!(m.query_parameters[0].name, "debug");

        match route.action.as_ref() {
            Some(Action::Route(action)) => {
                assert_eq!(action.cluster_specifier, Some(ClusterSpecifier::Cluster("ns/api/80".into())));
                assert_eq!(action.timeout.as_ref().unwrap().seconds, 0);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn weighted_clusters_and_retries() {
        let mut action = forward(vec![("ns/a/80", 90), ("ns/b/80", 10)]);
        action.retry = Some(crate::graph::RetrySettings {
            count: 3,
            per_try_timeout: Timeout::After(Duration::from_millis(250)),
        });

        let built = route_table_resource(
            &listener(vec![node(
                Matcher::from_route_match(&crate::domain::RouteMatch::prefix("/")),
                RouteNodeAction::Forward(action),
            )]),
            &TranslateOptions::default(),
        )
        .unwrap();

        let route = &decode(&built).virtual_hosts[0].routes[0];
        let Some(Action::Route(action)) = route.action.as_ref() else { panic!("expected route") };
        match action.cluster_specifier.as_ref() {
            Some(ClusterSpecifier::WeightedClusters(wc)) => {
                assert_eq!(wc.clusters.len(), 2);
                assert_eq!(wc.clusters[0].weight, Some(UInt32Value { value: 90 }));
            }
            other => panic!("unexpected specifier {:?}", other),
        }
        let retry = action.retry_policy.as_ref().unwrap();
        assert_eq!(retry.num_retries, Some(UInt32Value { value: 3 }));
        assert_eq!(retry.per_try_timeout.as_ref().unwrap().nanos, 250_000_000);
    }

    #[test]
    fn redirect_routes_upgrade_scheme() {
        let built = route_table_resource(
            &listener(vec![node(
                Matcher::from_route_match(&crate::domain::RouteMatch::prefix("/")),
                RouteNodeAction::HttpsRedirect,
            )]),
            &TranslateOptions::default(),
        )
        .unwrap();

        let route = &decode(&built).virtual_hosts[0].routes[0];
        match route.action.as_ref() {
            Some(Action::Redirect(redirect)) => assert_eq!(
                redirect.scheme_rewrite_specifier,
                Some(SchemeRewriteSpecifier::HttpsRedirect(true))
            ),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn global_header_policy_lands_on_route_table() {
        let options = TranslateOptions {
            request_headers: HeadersPolicy {
                set: BTreeMap::from([("x-gateway".to_string(), "gateplane".to_string())]),
                remove: vec!["x-internal".into()],
            },
            ..Default::default()
        };
        let config = decode(&route_table_resource(&listener(Vec::new()), &options).unwrap());
        assert_eq!(config.request_headers_to_add[0].header.as_ref().unwrap().key, "x-gateway");
        assert_eq!(config.request_headers_to_remove, vec!["x-internal"]);
    }
}
