//! Build and translation properties over generated object sets.

mod common;

use std::collections::BTreeSet;
use std::sync::OnceLock;

use common::*;
use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_action::ClusterSpecifier, RouteConfiguration,
};
use gateplane::domain::{ObjectRef, ObjectSnapshot, RoutingObject, Secret};
use gateplane::graph::{build, BuildOptions};
use gateplane::xds::{translate, ResourceSnapshot, TranslateOptions};
use proptest::prelude::*;
use prost::Message;

const HOSTS: [&str; 3] = ["a.example.com", "b.example.com", "c.example.com"];
const PATHS: [&str; 4] = ["/", "/api", "/api/v2", "/static"];
const SERVICES: [&str; 3] = ["web", "api", "missing"];

fn shared_secret() -> Secret {
    static SECRET: OnceLock<Secret> = OnceLock::new();
    SECRET.get_or_init(|| tls_secret("ns", "cert", "a.example.com")).clone()
}

#[derive(Debug, Clone)]
struct ObjectShape {
    host: usize,
    path: usize,
    service: usize,
    created: i64,
    secure: bool,
}

fn object_shape() -> impl Strategy<Value = ObjectShape> {
    (0..HOSTS.len(), 0..PATHS.len(), 0..SERVICES.len(), 0i64..4, any::<bool>()).prop_map(
        |(host, path, service, created, secure)| ObjectShape { host, path, service, created, secure },
    )
}

fn objects(shapes: &[ObjectShape]) -> Vec<RoutingObject> {
    shapes
        .iter()
        .enumerate()
        .map(|(i, shape)| {
            let object = root(meta("ns", &format!("obj-{}", i), shape.created), HOSTS[shape.host])
                .with_route(prefix_rule(PATHS[shape.path], SERVICES[shape.service], 80));
            if shape.secure {
                object.with_tls(tls("cert"))
            } else {
                object
            }
        })
        .collect()
}

fn snapshot(routing_objects: Vec<RoutingObject>) -> ObjectSnapshot {
    ObjectSnapshot {
        routing_objects,
        services: vec![service("ns", "web", 80), service("ns", "api", 80)],
        endpoints: vec![endpoints("ns", "web", &["10.0.0.1", "10.0.0.2"], 8080)],
        secrets: vec![shared_secret()],
    }
}

fn pipeline(snapshot: &ObjectSnapshot) -> ResourceSnapshot {
    let output = build(snapshot, &BuildOptions::default());
    translate(&output.graph, &TranslateOptions::default())
}

fn referenced_clusters(resources: &ResourceSnapshot) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for any in resources.routes.values() {
        let table = RouteConfiguration::decode(any.value.as_slice()).expect("route table");
        for route in table.virtual_hosts.iter().flat_map(|v| v.routes.iter()) {
            if let Some(Action::Route(action)) = &route.action {
                match &action.cluster_specifier {
                    Some(ClusterSpecifier::Cluster(name)) => {
                        names.insert(name.clone());
                    }
                    Some(ClusterSpecifier::WeightedClusters(weighted)) => {
                        names.extend(weighted.clusters.iter().map(|c| c.name.clone()));
                    }
                    _ => {}
                }
            }
        }
    }
    names
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn output_does_not_depend_on_input_order(
        (ordered, shuffled) in prop::collection::vec(object_shape(), 1..8).prop_flat_map(|shapes| {
            let routing_objects = objects(&shapes);
            (Just(routing_objects.clone()), Just(routing_objects).prop_shuffle())
        })
    ) {
        let first = snapshot(ordered);
        let second = snapshot(shuffled);
        prop_assert_eq!(pipeline(&first), pipeline(&second));

        let statuses_a = build(&first, &BuildOptions::default()).statuses;
        let statuses_b = build(&second, &BuildOptions::default()).statuses;
        prop_assert_eq!(statuses_a, statuses_b);
    }

    #[test]
    fn every_reference_resolves(shapes in prop::collection::vec(object_shape(), 0..8)) {
        let resources = pipeline(&snapshot(objects(&shapes)));

        for cluster in referenced_clusters(&resources) {
            prop_assert!(resources.clusters.contains_key(&cluster), "missing cluster {}", cluster);
            prop_assert!(resources.endpoints.contains_key(&cluster), "missing assignment {}", cluster);
        }

        let listeners: BTreeSet<_> = resources.listeners.keys().collect();
        let tables: BTreeSet<_> = resources.routes.keys().collect();
        prop_assert_eq!(listeners, tables);

        let graph = build(&snapshot(objects(&shapes)), &BuildOptions::default()).graph;
        for listener in &graph.listeners {
            for vhost in &listener.virtual_hosts {
                if let Some(tls) = &vhost.tls {
                    prop_assert!(resources.secrets.contains_key(&tls.secret));
                }
            }
        }
    }

    #[test]
    fn oldest_object_wins_identical_matches(
        created in prop::collection::btree_set(0i64..1000, 2..5),
        rotate in 0usize..5
    ) {
        let created: Vec<i64> = created.into_iter().collect();
        let oldest = created[0];

        let mut routing_objects: Vec<RoutingObject> = created
            .iter()
            .map(|ts| {
                root(meta("ns", &format!("obj-{}", ts), *ts), "a.example.com")
                    .with_route(prefix_rule("/", "web", 80))
            })
            .collect();
        let len = routing_objects.len();
        routing_objects.rotate_left(rotate % len);

        let output = build(&snapshot(routing_objects), &BuildOptions::default());
        let vhost = output.graph.virtual_host("a.example.com", false).expect("vhost");
        prop_assert_eq!(vhost.routes.len(), 1);
        prop_assert_eq!(
            &vhost.routes[0].owner,
            &ObjectRef::routing_object("ns", format!("obj-{}", oldest))
        );
    }
}
