//! Secret resource builder for SDS (Secret Discovery Service)
//!
//! Certificates reach the graph already validated; this module only wraps the
//! PEM material as an inline `TlsCertificate`.

use envoy_types::pb::envoy::config::core::v3::{data_source::Specifier, DataSource};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    secret, Secret, TlsCertificate,
};

use crate::graph::TlsSecret;
use crate::{Error, Result};

use super::resources::{BuiltResource, SECRET_TYPE_URL};

pub fn secret_resource(node: &TlsSecret) -> Result<BuiltResource> {
    if node.certificate.is_empty() || node.private_key.is_empty() {
        return Err(Error::internal(format!("Secret {} has no certificate material", node.name)));
    }

    let secret = Secret {
        name: node.name.clone(),
        r#type: Some(secret::Type::TlsCertificate(TlsCertificate {
            certificate_chain: Some(inline(&node.certificate)),
            private_key: Some(inline(&node.private_key)),
            ..Default::default()
        })),
    };

    Ok(BuiltResource::new(node.name.clone(), SECRET_TYPE_URL, &secret))
}

fn inline(pem: &str) -> DataSource {
    DataSource { specifier: Some(Specifier::InlineString(pem.to_string())), ..Default::default() }
}
