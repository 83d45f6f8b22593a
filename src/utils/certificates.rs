use anyhow::anyhow;
use ring::{
    rand::SystemRandom,
    signature::{
        EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING,
        ECDSA_P384_SHA384_ASN1_SIGNING,
    },
};
use rustls::pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use simple_asn1::{ASN1Block, BigInt, OID};

use crate::errors::TlsError;

const OID_ED25519: &str = "1.3.101.112";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";

/// Summary of a validated certificate/key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPairSummary {
    /// Number of certificates in the chain, leaf included.
    pub chain_len: usize,
    /// OID of the leaf's public key algorithm.
    pub public_key_algorithm: String,
}

/// Check that `certificate_pem` holds at least one certificate and that
/// `private_key_pem` is the private half of the leaf's public key.
///
/// Unknown key algorithms are accepted once both halves parse.
pub fn validate_key_pair_pem(
    certificate_pem: &str,
    private_key_pem: &str,
) -> Result<KeyPairSummary, TlsError> {
    let chain: Vec<CertificateDer<'static>> =
        CertificateDer::pem_slice_iter(certificate_pem.as_bytes())
            .map(|result| result.map_err(|err| TlsError::InvalidCertificatePem { source: anyhow!(err) }))
            .collect::<Result<_, _>>()?;

    let leaf = chain.first().ok_or(TlsError::EmptyCertificateChain)?;

    let private_key = PrivateKeyDer::from_pem_slice(private_key_pem.as_bytes())
        .map_err(|err| TlsError::InvalidPrivateKey { source: Some(anyhow!(err)) })?;

    let spki = parse_public_key_info(leaf)?;
    enforce_public_key_match(&spki.algorithm_oid, &spki.public_key, &private_key)?;

    Ok(KeyPairSummary { chain_len: chain.len(), public_key_algorithm: spki.algorithm_oid })
}

struct PublicKeyInfo {
    algorithm_oid: String,
    public_key: Vec<u8>,
}

fn metadata_error(message: &'static str) -> TlsError {
    TlsError::CertificateMetadata { source: anyhow!(message) }
}

/// Walk Certificate -> tbsCertificate -> subjectPublicKeyInfo.
fn parse_public_key_info(cert: &CertificateDer<'_>) -> Result<PublicKeyInfo, TlsError> {
    let blocks = simple_asn1::from_der(cert.as_ref())
        .map_err(|err| TlsError::CertificateMetadata { source: anyhow!(err) })?;

    let Some(ASN1Block::Sequence(_, cert_seq)) = blocks.first() else {
        return Err(metadata_error("certificate missing outer sequence"));
    };
    let Some(ASN1Block::Sequence(_, tbs)) = cert_seq.first() else {
        return Err(metadata_error("certificate missing tbsCertificate"));
    };

    // Optional [0] version, then serial, signature, issuer, validity, subject, spki.
    let offset = usize::from(matches!(tbs.first(), Some(ASN1Block::Explicit(..))));
    let spki = tbs.get(offset + 5).ok_or_else(|| metadata_error("certificate missing subjectPublicKeyInfo"))?;

    let ASN1Block::Sequence(_, items) = spki else {
        return Err(metadata_error("subjectPublicKeyInfo is not a sequence"));
    };
    let (Some(ASN1Block::Sequence(_, algorithm)), Some(key)) = (items.first(), items.get(1)) else {
        return Err(metadata_error("subjectPublicKeyInfo missing fields"));
    };
    let Some(ASN1Block::ObjectIdentifier(_, oid)) = algorithm.first() else {
        return Err(metadata_error("algorithm identifier missing OID"));
    };
    let ASN1Block::BitString(_, bit_len, public_key) = key else {
        return Err(metadata_error("subject public key is not a bit string"));
    };

    if bit_len % 8 != 0 || public_key.len() * 8 != *bit_len {
        return Err(metadata_error("subject public key contains unused bits"));
    }

    Ok(PublicKeyInfo { algorithm_oid: oid_to_string(oid), public_key: public_key.clone() })
}

fn enforce_public_key_match(
    algorithm_oid: &str,
    public_key: &[u8],
    private_key: &PrivateKeyDer<'_>,
) -> Result<(), TlsError> {
    let key_bytes = private_key.secret_der();

    match algorithm_oid {
        OID_ED25519 => {
            // rcgen and openssl emit PKCS#8 v1 without the public key.
            let key_pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(key_bytes)
                .map_err(|_| TlsError::CertificateKeyMismatch)?;
            compare_bytes(key_pair.public_key().as_ref(), public_key)
        }
        OID_EC_PUBLIC_KEY => {
            let rng = SystemRandom::new();
            for alg in [&ECDSA_P256_SHA256_ASN1_SIGNING, &ECDSA_P384_SHA384_ASN1_SIGNING] {
                if let Ok(key_pair) = EcdsaKeyPair::from_pkcs8(alg, key_bytes, &rng) {
                    return compare_bytes(key_pair.public_key().as_ref(), public_key);
                }
            }
            Err(TlsError::CertificateKeyMismatch)
        }
        OID_RSA_ENCRYPTION => {
            let key_pair = RsaKeyPair::from_pkcs8(key_bytes)
                .or_else(|_| RsaKeyPair::from_der(key_bytes))
                .map_err(|err| TlsError::InvalidPrivateKey { source: Some(anyhow!(err)) })?;
            compare_rsa_public_key(&key_pair, public_key)
                .map_err(|_| TlsError::CertificateKeyMismatch)
        }
        _ => Ok(()),
    }
}

fn compare_bytes(expected: &[u8], actual: &[u8]) -> Result<(), TlsError> {
    if expected == actual {
        Ok(())
    } else {
        Err(TlsError::CertificateKeyMismatch)
    }
}

/// Compare modulus and exponent of a PKCS#1 RSAPublicKey against the key pair.
fn compare_rsa_public_key(key_pair: &RsaKeyPair, public_key: &[u8]) -> anyhow::Result<()> {
    let subject = rsa_components(public_key)?;
    let key = rsa_components(key_pair.public().as_ref())?;

    if subject == key {
        Ok(())
    } else {
        Err(anyhow!("RSA key mismatch"))
    }
}

fn rsa_components(der: &[u8]) -> anyhow::Result<(Vec<u8>, Vec<u8>)> {
    let blocks = simple_asn1::from_der(der)?;
    let Some(ASN1Block::Sequence(_, items)) = blocks.first() else {
        return Err(anyhow!("RSA public key is not a sequence"));
    };

    match (items.first(), items.get(1)) {
        (Some(ASN1Block::Integer(_, modulus)), Some(ASN1Block::Integer(_, exponent))) => {
            Ok((bigint_to_bytes(modulus), bigint_to_bytes(exponent)))
        }
        _ => Err(anyhow!("RSA public key missing modulus/exponent")),
    }
}

fn bigint_to_bytes(value: &BigInt) -> Vec<u8> {
    value.to_biguint().map_or_else(Vec::new, |v| v.to_bytes_be())
}

fn oid_to_string(oid: &OID) -> String {
    oid.as_vec::<u64>()
        .map(|components| {
            components.into_iter().map(|n| n.to_string()).collect::<Vec<_>>().join(".")
        })
        .unwrap_or_else(|_| "unknown".to_string())
}
