//! Graph construction: object snapshot in, resolved graph and admission
//! statuses out. A build never fails; per-object problems become statuses.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::debug;

use super::conflict::ConflictPrecedence;
use super::matcher::{specificity_cmp, Matcher};
use super::validate::validate_object;
use super::{
    cluster_name, secret_name, Cluster, DependencyGraph, ForwardAction, Listener, RetrySettings,
    Route, RouteAction, TlsSecret, TlsVersion, VirtualHost, VirtualHostTls, WeightedCluster,
    HTTPS_LISTENER_NAME, HTTP_LISTENER_NAME,
};
use crate::config::{Config, ListenerAddress};
use crate::domain::{
    AdmissionStatus, Endpoints, ObjectKind, ObjectMeta, ObjectRef, ObjectSnapshot, Reason,
    ReasonKind, RouteRule, RoutingObject, Secret, Service, StatusDetail,
};
use crate::utils::{validate_key_pair_pem, Timeout};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Knobs the builder takes from the process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub http: ListenerAddress,
    pub https: ListenerAddress,
    pub disable_permit_insecure: bool,
    pub connect_timeout: Duration,
    pub precedence: ConflictPrecedence,
    /// Floor for every secure virtual host.
    pub minimum_tls_version: TlsVersion,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl BuildOptions {
    pub fn from_config(config: &Config) -> Self {
        let connect_timeout = match Timeout::parse(&config.timeouts.connect) {
            Ok(Timeout::After(d)) => d,
            _ => DEFAULT_CONNECT_TIMEOUT,
        };

        Self {
            http: config.listeners.http.clone(),
            https: config.listeners.https.clone(),
            disable_permit_insecure: config.disable_permit_insecure,
            connect_timeout,
            precedence: config.conflict_precedence,
            minimum_tls_version: TlsVersion::parse(&config.tls.minimum_protocol_version)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub graph: DependencyGraph,
    /// One entry per routing object in the snapshot.
    pub statuses: BTreeMap<ObjectRef, AdmissionStatus>,
}

/// Build the dependency graph for `snapshot`.
pub fn build(snapshot: &ObjectSnapshot, options: &BuildOptions) -> BuildOutput {
    let mut builder = Builder::new(snapshot, options);
    builder.resolve_tls();
    builder.walk_roots();
    let output = builder.finish();

    debug!(
        listeners = output.graph.listeners.len(),
        clusters = output.graph.clusters.len(),
        secrets = output.graph.secrets.len(),
        objects = output.statuses.len(),
        "Dependency graph built"
    );

    output
}

/// TLS outcome for one root.
enum RootTls {
    Plain,
    Valid { secret: TlsSecret, version: TlsVersion, permit_insecure: bool },
    Blocked { reason: Reason, permit_insecure: bool },
}

enum PlacementMode {
    Plain,
    Secure { permit_insecure: bool },
    Blocked { reason: Reason, permit_insecure: bool },
}

enum PendingAction {
    Forward { action: ForwardAction, clusters: Vec<Cluster> },
    Redirect,
}

/// One placement of one rule on one virtual host, before conflicts are
/// resolved.
struct Candidate<'a> {
    matcher: Matcher,
    action: PendingAction,
    owner: ObjectRef,
    owner_meta: &'a ObjectMeta,
    rule: usize,
    root: ObjectRef,
    /// Root first, owner last.
    lineage: Vec<ObjectRef>,
}

type HostKey = (String, bool);

struct Builder<'a> {
    options: &'a BuildOptions,
    routing: BTreeMap<ObjectRef, &'a RoutingObject>,
    services: BTreeMap<ObjectRef, &'a Service>,
    endpoints: BTreeMap<ObjectRef, &'a Endpoints>,
    secrets: BTreeMap<ObjectRef, &'a Secret>,

    statuses: BTreeMap<ObjectRef, AdmissionStatus>,
    details: BTreeMap<ObjectRef, Vec<StatusDetail>>,
    reached: BTreeSet<ObjectRef>,
    admitted: BTreeSet<ObjectRef>,

    root_tls: BTreeMap<ObjectRef, RootTls>,
    vhost_tls: BTreeMap<String, (VirtualHostTls, TlsSecret)>,
    tls_conflicts: BTreeSet<(ObjectRef, String)>,

    candidates: BTreeMap<HostKey, BTreeMap<String, Vec<Candidate<'a>>>>,
}

impl<'a> Builder<'a> {
    fn new(snapshot: &'a ObjectSnapshot, options: &'a BuildOptions) -> Self {
        let mut builder = Self {
            options,
            routing: BTreeMap::new(),
            services: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            secrets: BTreeMap::new(),
            statuses: BTreeMap::new(),
            details: BTreeMap::new(),
            reached: BTreeSet::new(),
            admitted: BTreeSet::new(),
            root_tls: BTreeMap::new(),
            vhost_tls: BTreeMap::new(),
            tls_conflicts: BTreeSet::new(),
            candidates: BTreeMap::new(),
        };

        for service in &snapshot.services {
            builder.services.entry(service.object_ref()).or_insert(service);
        }
        for endpoints in &snapshot.endpoints {
            builder.endpoints.entry(endpoints.object_ref()).or_insert(endpoints);
        }
        for secret in &snapshot.secrets {
            builder.secrets.entry(secret.object_ref()).or_insert(secret);
        }

        for object in &snapshot.routing_objects {
            let object_ref = object.object_ref();
            if builder.routing.contains_key(&object_ref) || builder.statuses.contains_key(&object_ref)
            {
                continue;
            }
            match validate_object(object) {
                Ok(()) => {
                    builder.routing.insert(object_ref, object);
                }
                Err(message) => {
                    builder.statuses.insert(
                        object_ref,
                        AdmissionStatus::invalid(
                            Reason::new(ReasonKind::MalformedObject, message),
                            Vec::new(),
                        ),
                    );
                }
            }
        }

        builder
    }

    fn roots(&self) -> Vec<&'a RoutingObject> {
        self.routing.values().copied().filter(|o| o.is_root()).collect()
    }

    fn detail(&mut self, object: &ObjectRef, detail: StatusDetail) {
        self.details.entry(object.clone()).or_default().push(detail);
    }

    /// Check every root's certificate and pick the certificate each secure
    /// hostname is served with.
    fn resolve_tls(&mut self) {
        let permit_allowed = !self.options.disable_permit_insecure;

        for root in self.roots() {
            let root_ref = root.object_ref();
            let state = match (&root.tls, root.secret_ref()) {
                (Some(tls), Some(secret_ref)) => {
                    let permit_insecure = tls.permit_insecure && permit_allowed;
                    match self.resolve_secret(&secret_ref) {
                        Ok(secret) => {
                            let requested = tls
                                .minimum_protocol_version
                                .as_deref()
                                .and_then(TlsVersion::parse)
                                .unwrap_or_default();
                            RootTls::Valid {
                                secret,
                                version: requested.max(self.options.minimum_tls_version),
                                permit_insecure,
                            }
                        }
                        Err(reason) => {
                            self.detail(
                                &root_ref,
                                StatusDetail { rule: None, hostname: None, reason: reason.clone() },
                            );
                            RootTls::Blocked { reason, permit_insecure }
                        }
                    }
                }
                _ => RootTls::Plain,
            };
            self.root_tls.insert(root_ref, state);
        }

        // Per hostname, the precedence winner among roots with a usable
        // certificate decides which secret is served.
        let mut claims: BTreeMap<String, Vec<&'a RoutingObject>> = BTreeMap::new();
        for root in self.roots() {
            if let Some(RootTls::Valid { .. }) = self.root_tls.get(&root.object_ref()) {
                for hostname in &root.hostnames {
                    claims.entry(hostname.clone()).or_default().push(root);
                }
            }
        }

        for (hostname, mut roots) in claims {
            roots.sort_by(|a, b| self.precedence(&a.meta, &b.meta, &a.object_ref(), &b.object_ref()));
            let Some(winner) = roots.first() else { continue };
            let winner_ref = winner.object_ref();
            let Some(RootTls::Valid { secret, version, .. }) = self.root_tls.get(&winner_ref) else {
                continue;
            };
            let (secret, version) = (secret.clone(), *version);

            for loser in roots.iter().skip(1) {
                let loser_ref = loser.object_ref();
                if let Some(RootTls::Valid { secret: other, .. }) = self.root_tls.get(&loser_ref) {
                    if other.name != secret.name {
                        self.tls_conflicts.insert((loser_ref, hostname.clone()));
                    }
                }
            }

            let tls = VirtualHostTls { secret: secret.name.clone(), minimum_protocol_version: version };
            self.vhost_tls.insert(hostname, (tls, secret));
        }
    }

    fn resolve_secret(&self, secret_ref: &ObjectRef) -> Result<TlsSecret, Reason> {
        let name = secret_ref.namespaced_name();
        let secret = self.secrets.get(secret_ref).ok_or_else(|| {
            Reason::new(ReasonKind::SecretNotFound, format!("secret {} does not exist", name))
        })?;

        let certificate = secret.certificate.as_deref().filter(|c| !c.trim().is_empty());
        let private_key = secret.private_key.as_deref().filter(|k| !k.trim().is_empty());
        let (certificate, private_key) = match (certificate, private_key) {
            (Some(c), Some(k)) => (c, k),
            (None, _) => {
                return Err(Reason::new(
                    ReasonKind::SecretInvalid,
                    format!("secret {} has no certificate", name),
                ))
            }
            (_, None) => {
                return Err(Reason::new(
                    ReasonKind::SecretInvalid,
                    format!("secret {} has no private key", name),
                ))
            }
        };

        validate_key_pair_pem(certificate, private_key).map_err(|e| {
            Reason::new(ReasonKind::SecretInvalid, format!("secret {}: {}", name, e))
        })?;

        Ok(TlsSecret {
            name: secret_name(secret_ref),
            source: secret_ref.clone(),
            certificate: certificate.to_string(),
            private_key: private_key.to_string(),
        })
    }

    fn precedence(&self, a: &ObjectMeta, b: &ObjectMeta, a_ref: &ObjectRef, b_ref: &ObjectRef) -> Ordering {
        self.options.precedence.compare(a, b).then_with(|| a_ref.cmp(b_ref))
    }

    fn walk_roots(&mut self) {
        for root in self.roots() {
            let mut lineage = vec![root.object_ref()];
            self.walk(root, root, None, &mut lineage);
        }
    }

    fn walk(
        &mut self,
        root: &'a RoutingObject,
        object: &'a RoutingObject,
        conditions: Option<&Matcher>,
        lineage: &mut Vec<ObjectRef>,
    ) {
        let object_ref = object.object_ref();
        self.reached.insert(object_ref.clone());

        for (index, rule) in object.routes.iter().enumerate() {
            self.place_rule(root, object, index, rule, conditions, lineage);
        }

        for include in &object.includes {
            let target_ref = object.include_ref(include);

            if lineage.contains(&target_ref) {
                self.detail(
                    &object_ref,
                    StatusDetail {
                        rule: None,
                        hostname: None,
                        reason: Reason::new(
                            ReasonKind::IncludeCycle,
                            format!("including {} forms a cycle", target_ref.namespaced_name()),
                        ),
                    },
                );
                continue;
            }

            let target = match self.routing.get(&target_ref).copied() {
                Some(target) if !target.is_root() => target,
                Some(_) => {
                    self.detail(
                        &object_ref,
                        StatusDetail {
                            rule: None,
                            hostname: None,
                            reason: Reason::new(
                                ReasonKind::IncludeNotFound,
                                format!("{} declares hostnames and cannot be included", target_ref.namespaced_name()),
                            ),
                        },
                    );
                    continue;
                }
                None => {
                    self.detail(
                        &object_ref,
                        StatusDetail {
                            rule: None,
                            hostname: None,
                            reason: Reason::new(
                                ReasonKind::IncludeNotFound,
                                format!("{} does not exist or is invalid", target_ref.namespaced_name()),
                            ),
                        },
                    );
                    continue;
                }
            };

            let own = Matcher::from_route_match(&include.conditions);
            let nested = match conditions {
                Some(outer) => own.under(outer),
                None => own,
            };

            lineage.push(target_ref);
            self.walk(root, target, Some(&nested), lineage);
            lineage.pop();
        }
    }

    fn place_rule(
        &mut self,
        root: &'a RoutingObject,
        owner: &'a RoutingObject,
        index: usize,
        rule: &'a RouteRule,
        conditions: Option<&Matcher>,
        lineage: &[ObjectRef],
    ) {
        let owner_ref = owner.object_ref();
        let root_ref = root.object_ref();

        let (action, clusters) = match self.resolve_backends(owner, rule) {
            Ok(resolved) => resolved,
            Err(reason) => {
                self.detail(&owner_ref, StatusDetail { rule: Some(index), hostname: None, reason });
                return;
            }
        };

        let own = Matcher::from_route_match(&rule.matches);
        let matcher = match conditions {
            Some(outer) => own.under(outer),
            None => own,
        };

        let mode = match self.root_tls.get(&root_ref) {
            None | Some(RootTls::Plain) => PlacementMode::Plain,
            Some(RootTls::Valid { permit_insecure, .. }) => {
                PlacementMode::Secure { permit_insecure: *permit_insecure }
            }
            Some(RootTls::Blocked { reason, permit_insecure }) => {
                PlacementMode::Blocked { reason: reason.clone(), permit_insecure: *permit_insecure }
            }
        };

        for hostname in &root.hostnames {
            let mut placements: Vec<(bool, PendingAction)> = Vec::new();
            let forward = || PendingAction::Forward { action: action.clone(), clusters: clusters.clone() };

            match &mode {
                PlacementMode::Plain => placements.push((false, forward())),
                PlacementMode::Secure { permit_insecure } => {
                    if self.tls_conflicts.contains(&(root_ref.clone(), hostname.clone())) {
                        let served = self
                            .vhost_tls
                            .get(hostname)
                            .map(|(tls, _)| tls.secret.clone())
                            .unwrap_or_default();
                        self.detail(
                            &owner_ref,
                            StatusDetail {
                                rule: Some(index),
                                hostname: Some(hostname.clone()),
                                reason: Reason::new(
                                    ReasonKind::TlsConflict,
                                    format!("{} is already served with secret {}", hostname, served),
                                ),
                            },
                        );
                    } else {
                        placements.push((true, forward()));
                    }
                    if *permit_insecure {
                        placements.push((false, forward()));
                    } else {
                        placements.push((false, PendingAction::Redirect));
                    }
                }
                PlacementMode::Blocked { reason, permit_insecure } => {
                    if *permit_insecure {
                        placements.push((false, forward()));
                    } else if owner_ref != root_ref {
                        let detail = StatusDetail { rule: None, hostname: None, reason: reason.clone() };
                        self.detail(&owner_ref, detail);
                    }
                }
            }

            for (secure, pending) in placements {
                let key = matcher.key();
                self.candidates
                    .entry((hostname.clone(), secure))
                    .or_default()
                    .entry(key)
                    .or_default()
                    .push(Candidate {
                        matcher: matcher.clone(),
                        action: pending,
                        owner: owner_ref.clone(),
                        owner_meta: &owner.meta,
                        rule: index,
                        root: root_ref.clone(),
                        lineage: lineage.to_vec(),
                    });
            }
        }
    }

    /// Resolve every backend of `rule` to a cluster.
    fn resolve_backends(
        &self,
        owner: &RoutingObject,
        rule: &RouteRule,
    ) -> Result<(ForwardAction, Vec<Cluster>), Reason> {
        let mut clusters = Vec::with_capacity(rule.backends.len());
        let mut weights: Vec<(String, Option<u32>)> = Vec::with_capacity(rule.backends.len());

        for backend in &rule.backends {
            let service_ref = ObjectRef::service(owner.meta.namespace.clone(), backend.service.clone());
            let service = self.services.get(&service_ref).ok_or_else(|| {
                Reason::new(
                    ReasonKind::ServiceNotFound,
                    format!("service {} does not exist", service_ref.namespaced_name()),
                )
            })?;
            let port = service.port(backend.port).ok_or_else(|| {
                Reason::new(
                    ReasonKind::ServicePortNotFound,
                    format!("service {} has no port {}", service_ref.namespaced_name(), backend.port),
                )
            })?;

            let endpoints_ref = ObjectRef::new(
                ObjectKind::Endpoints,
                service_ref.namespace.clone(),
                service_ref.name.clone(),
            );
            let endpoints = self
                .endpoints
                .get(&endpoints_ref)
                .map(|e| e.ready_for(port))
                .unwrap_or_default();

            let name = cluster_name(&service_ref, backend.port, rule.load_balancer);
            weights.push((name.clone(), backend.weight));
            clusters.push(Cluster {
                name,
                service: service_ref,
                port: backend.port,
                load_balancer: rule.load_balancer,
                connect_timeout: self.options.connect_timeout,
                endpoints,
            });
        }

        let timeout = |value: Option<&String>| {
            value.map(|v| Timeout::parse(v).unwrap_or_default()).unwrap_or_default()
        };
        let policy = rule.timeout_policy.as_ref();

        let action = ForwardAction {
            clusters: resolve_weights(weights),
            timeout: timeout(policy.and_then(|p| p.response.as_ref())),
            idle_timeout: timeout(policy.and_then(|p| p.idle.as_ref())),
            retry: rule.retry_policy.as_ref().map(|retry| RetrySettings {
                count: retry.count,
                per_try_timeout: timeout(retry.per_try_timeout.as_ref()),
            }),
            request_headers: rule.request_headers.clone(),
            response_headers: rule.response_headers.clone(),
            prefix_rewrite: rule.prefix_rewrite.clone(),
        };

        Ok((action, clusters))
    }

    fn finish(mut self) -> BuildOutput {
        let mut graph = DependencyGraph::default();
        let mut hosts: BTreeMap<HostKey, Vec<Route>> = BTreeMap::new();

        let candidates = std::mem::take(&mut self.candidates);
        for ((hostname, secure), by_key) in candidates {
            for (key, mut group) in by_key {
                group.sort_by(|a, b| {
                    self.precedence(a.owner_meta, b.owner_meta, &a.owner, &b.owner)
                        .then_with(|| a.rule.cmp(&b.rule))
                        .then_with(|| a.root.cmp(&b.root))
                });

                let mut group = group.into_iter();
                let Some(winner) = group.next() else { continue };

                for loser in group {
                    // Same rule reached through two paths.
                    if loser.owner == winner.owner && loser.rule == winner.rule {
                        continue;
                    }
                    self.detail(
                        &loser.owner,
                        StatusDetail {
                            rule: Some(loser.rule),
                            hostname: Some(hostname.clone()),
                            reason: Reason::new(
                                ReasonKind::RouteConflict,
                                format!(
                                    "{} on {} is already claimed by {}",
                                    key,
                                    hostname,
                                    winner.owner.namespaced_name()
                                ),
                            ),
                        },
                    );
                }

                let action = match winner.action {
                    PendingAction::Forward { action, clusters } => {
                        for cluster in clusters {
                            graph.clusters.entry(cluster.name.clone()).or_insert(cluster);
                        }
                        self.admitted.extend(winner.lineage.iter().cloned());
                        RouteAction::Forward(action)
                    }
                    PendingAction::Redirect => RouteAction::HttpsRedirect,
                };

                hosts.entry((hostname.clone(), secure)).or_default().push(Route {
                    matcher: winner.matcher,
                    action,
                    owner: winner.owner,
                    rule: winner.rule,
                });
            }
        }

        let mut insecure_hosts = Vec::new();
        let mut secure_hosts = Vec::new();
        for ((hostname, secure), mut routes) in hosts {
            routes.sort_by(|a, b| {
                specificity_cmp(&a.matcher, &b.matcher)
                    .then_with(|| a.owner.cmp(&b.owner))
                    .then_with(|| a.rule.cmp(&b.rule))
            });

            if secure {
                let Some((tls, secret)) = self.vhost_tls.get(&hostname) else { continue };
                graph.secrets.entry(secret.name.clone()).or_insert_with(|| secret.clone());
                secure_hosts.push(VirtualHost {
                    hostname,
                    port: self.options.https.port,
                    tls: Some(tls.clone()),
                    routes,
                });
            } else {
                insecure_hosts.push(VirtualHost {
                    hostname,
                    port: self.options.http.port,
                    tls: None,
                    routes,
                });
            }
        }

        graph.listeners.push(Listener {
            name: HTTP_LISTENER_NAME.to_string(),
            address: self.options.http.address.clone(),
            port: self.options.http.port,
            secure: false,
            virtual_hosts: insecure_hosts,
        });
        if !secure_hosts.is_empty() {
            graph.listeners.push(Listener {
                name: HTTPS_LISTENER_NAME.to_string(),
                address: self.options.https.address.clone(),
                port: self.options.https.port,
                secure: true,
                virtual_hosts: secure_hosts,
            });
        }
        graph.listeners.sort_by(|a, b| a.name.cmp(&b.name));

        let mut statuses = std::mem::take(&mut self.statuses);
        for object_ref in self.routing.keys() {
            let mut details = self.details.remove(object_ref).unwrap_or_default();
            dedup_details(&mut details);

            let status = if !self.reached.contains(object_ref) {
                AdmissionStatus::orphaned(Reason::new(
                    ReasonKind::NotIncluded,
                    format!("{} is not included by any root", object_ref.namespaced_name()),
                ))
            } else if self.admitted.contains(object_ref) {
                AdmissionStatus::valid(details)
            } else {
                let reason = details.first().map(|d| d.reason.clone()).unwrap_or_else(|| {
                    Reason::new(ReasonKind::MalformedObject, "no routes admitted")
                });
                AdmissionStatus::invalid(reason, details)
            };
            statuses.insert(object_ref.clone(), status);
        }

        BuildOutput { graph, statuses }
    }
}

/// No weights, or all zero: equal split. Otherwise unspecified weights
/// count as zero. Repeated clusters are merged.
fn resolve_weights(weights: Vec<(String, Option<u32>)>) -> Vec<WeightedCluster> {
    let total: u64 = weights.iter().filter_map(|(_, w)| *w).map(u64::from).sum();
    let equal = total == 0;

    let mut merged: BTreeMap<String, u32> = BTreeMap::new();
    for (cluster, weight) in weights {
        let weight = if equal { 1 } else { weight.unwrap_or(0) };
        let entry = merged.entry(cluster).or_insert(0);
        *entry = entry.saturating_add(weight);
    }

    merged.into_iter().map(|(cluster, weight)| WeightedCluster { cluster, weight }).collect()
}

fn dedup_details(details: &mut Vec<StatusDetail>) {
    let mut seen = Vec::with_capacity(details.len());
    details.retain(|d| {
        if seen.contains(d) {
            false
        } else {
            seen.push(d.clone());
            true
        }
    });
}
