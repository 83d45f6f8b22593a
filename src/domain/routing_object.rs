//! Routing objects: the authored input describing virtual hosts and routes.

use serde::{Deserialize, Serialize};

use super::id::{split_namespaced, ObjectKind, ObjectMeta, ObjectRef};
use super::route::{RouteMatch, RouteRule};

/// TLS requirement of a root routing object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSpec {
    /// `name` in the object's namespace, or `namespace/name`.
    pub secret_name: String,
    /// Also serve the routes over plain HTTP instead of redirecting.
    #[serde(default)]
    pub permit_insecure: bool,
    /// Overrides the global minimum (`1.2` or `1.3`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_protocol_version: Option<String>,
}

/// Delegation of a path space to another routing object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Include {
    pub name: String,
    /// Defaults to the including object's namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Prepended to every included rule. Only a prefix path is allowed.
    #[serde(default)]
    pub conditions: RouteMatch,
}

/// A routing object. Objects that declare hostnames are roots; objects
/// without hostnames only take effect when a root includes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingObject {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,
    #[serde(default)]
    pub routes: Vec<RouteRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<Include>,
}

impl RoutingObject {
    pub fn new(meta: ObjectMeta) -> Self {
        Self { meta, hostnames: Vec::new(), tls: None, routes: Vec::new(), includes: Vec::new() }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostnames.push(hostname.into());
        self
    }

    pub fn with_tls(mut self, tls: TlsSpec) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_route(mut self, rule: RouteRule) -> Self {
        self.routes.push(rule);
        self
    }

    pub fn with_include(mut self, include: Include) -> Self {
        self.includes.push(include);
        self
    }

    pub fn object_ref(&self) -> ObjectRef {
        self.meta.object_ref(ObjectKind::RoutingObject)
    }

    pub fn is_root(&self) -> bool {
        !self.hostnames.is_empty()
    }

    /// Reference to the Secret named by the TLS block.
    pub fn secret_ref(&self) -> Option<ObjectRef> {
        self.tls.as_ref().map(|tls| {
            let (namespace, name) = split_namespaced(&tls.secret_name, &self.meta.namespace);
            ObjectRef::secret(namespace, name)
        })
    }

    /// Reference to the object named by an include.
    pub fn include_ref(&self, include: &Include) -> ObjectRef {
        let namespace = include.namespace.clone().unwrap_or_else(|| self.meta.namespace.clone());
        ObjectRef::routing_object(namespace, include.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_ref_defaults_to_object_namespace() {
        let object = RoutingObject::new(ObjectMeta::new("shop", "web"))
            .with_hostname("shop.example.com")
            .with_tls(TlsSpec { secret_name: "shop-tls".into(), ..Default::default() });
        assert_eq!(object.secret_ref(), Some(ObjectRef::secret("shop", "shop-tls")));

        let object = object
            .with_tls(TlsSpec { secret_name: "certs/wildcard".into(), ..Default::default() });
        assert_eq!(object.secret_ref(), Some(ObjectRef::secret("certs", "wildcard")));
    }

    #[test]
    fn manifest_form_flattens_metadata() {
        let yaml = r#"
namespace: shop
name: web
creation_timestamp: 2024-03-01T10:00:00Z
hostnames: [shop.example.com]
routes:
  - backends:
      - service: web
        port: 80
"#;
        let object: RoutingObject = serde_yaml::from_str(yaml).expect("object parses");
        assert!(object.is_root());
        assert_eq!(object.object_ref(), ObjectRef::routing_object("shop", "web"));
        assert!(object.meta.creation_timestamp.is_some());
        assert_eq!(object.routes[0].matches.path, None);
    }
}
