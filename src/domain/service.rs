//! Backend services, their endpoints and TLS secrets.

use serde::{Deserialize, Serialize};

use super::id::{ObjectKind, ObjectMeta, ObjectRef};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    #[serde(default)]
    pub name: String,
    pub port: u16,
}

/// A named set of ports backed by [`Endpoints`] of the same name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

impl Service {
    pub fn new(meta: ObjectMeta) -> Self {
        Self { meta, ports: Vec::new() }
    }

    pub fn with_port(mut self, name: impl Into<String>, port: u16) -> Self {
        self.ports.push(ServicePort { name: name.into(), port });
        self
    }

    pub fn object_ref(&self) -> ObjectRef {
        self.meta.object_ref(ObjectKind::Service)
    }

    pub fn port(&self, port: u16) -> Option<&ServicePort> {
        self.ports.iter().find(|p| p.port == port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPort {
    #[serde(default)]
    pub name: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSubset {
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_ready_addresses: Vec<String>,
    #[serde(default)]
    pub ports: Vec<EndpointPort>,
}

/// Reachable addresses of the service with the same namespace/name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub subsets: Vec<EndpointSubset>,
}

/// A ready `address:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketEndpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoints {
    pub fn new(meta: ObjectMeta) -> Self {
        Self { meta, subsets: Vec::new() }
    }

    pub fn with_subset(mut self, subset: EndpointSubset) -> Self {
        self.subsets.push(subset);
        self
    }

    pub fn object_ref(&self) -> ObjectRef {
        self.meta.object_ref(ObjectKind::Endpoints)
    }

    /// Ready endpoints for a service port, sorted and de-duplicated.
    ///
    /// A named service port selects the endpoint port with the same name; an
    /// unnamed one selects the subset's only port.
    pub fn ready_for(&self, service_port: &ServicePort) -> Vec<SocketEndpoint> {
        let mut out: Vec<SocketEndpoint> = self
            .subsets
            .iter()
            .filter_map(|subset| {
                let port = if service_port.name.is_empty() {
                    match subset.ports.as_slice() {
                        [only] => Some(only),
                        _ => None,
                    }
                } else {
                    subset.ports.iter().find(|p| p.name == service_port.name)
                }?;
                Some(subset.addresses.iter().map(move |address| SocketEndpoint {
                    address: address.clone(),
                    port: port.port,
                }))
            })
            .flatten()
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

/// Certificate and key material, PEM encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl Secret {
    pub fn new(meta: ObjectMeta, certificate: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self { meta, certificate: Some(certificate.into()), private_key: Some(private_key.into()) }
    }

    pub fn object_ref(&self) -> ObjectRef {
        self.meta.object_ref(ObjectKind::Secret)
    }
}
