//! Object identity
//!
//! Every input object is addressed by `(kind, namespace, name)`. [`ObjectRef`]
//! is totally ordered so it can key the `BTreeMap`s that keep builds
//! deterministic.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of input objects the control plane consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    RoutingObject,
    Service,
    Endpoints,
    Secret,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::RoutingObject => "RoutingObject",
            ObjectKind::Service => "Service",
            ObjectKind::Endpoints => "Endpoints",
            ObjectKind::Secret => "Secret",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully qualified reference to an input object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind, namespace: namespace.into(), name: name.into() }
    }

    pub fn routing_object(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::RoutingObject, namespace, name)
    }

    pub fn service(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Service, namespace, name)
    }

    pub fn secret(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Secret, namespace, name)
    }

    /// `namespace/name`, without the kind.
    pub fn namespaced_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Metadata shared by every input object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into(), creation_timestamp: None }
    }

    pub fn created_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.creation_timestamp = Some(timestamp);
        self
    }

    pub fn object_ref(&self, kind: ObjectKind) -> ObjectRef {
        ObjectRef::new(kind, self.namespace.clone(), self.name.clone())
    }
}

/// Split `namespace/name`, defaulting the namespace when absent.
pub fn split_namespaced(reference: &str, default_namespace: &str) -> (String, String) {
    match reference.split_once('/') {
        Some((namespace, name)) => (namespace.to_string(), name.to_string()),
        None => (default_namespace.to_string(), reference.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_order_by_kind_then_namespace_then_name() {
        let a = ObjectRef::routing_object("a", "z");
        let b = ObjectRef::routing_object("b", "a");
        let svc = ObjectRef::service("a", "a");
        assert!(a < b);
        assert!(b < svc);
    }

    #[test]
    fn display_is_kind_namespace_name() {
        assert_eq!(ObjectRef::secret("ns", "tls").to_string(), "Secret/ns/tls");
    }

    #[test]
    fn namespaced_reference_parsing() {
        assert_eq!(split_namespaced("other/cert", "ns"), ("other".into(), "cert".into()));
        assert_eq!(split_namespaced("cert", "ns"), ("ns".into(), "cert".into()));
    }
}
