use thiserror::Error;

/// Errors raised while validating certificate and key material held in a Secret.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The secret carries no certificate.
    #[error("secret has no certificate")]
    MissingCertificate,

    /// The secret carries no private key.
    #[error("secret has no private key")]
    MissingPrivateKey,

    /// No certificates were found in the supplied PEM data.
    #[error("certificate PEM does not contain any certificates")]
    EmptyCertificateChain,

    /// The certificate PEM contents were invalid or unreadable.
    #[error("certificate is not a valid PEM: {source}")]
    InvalidCertificatePem {
        #[source]
        source: anyhow::Error,
    },

    /// The leaf certificate could not be decoded.
    #[error("failed to parse certificate: {source}")]
    CertificateMetadata {
        #[source]
        source: anyhow::Error,
    },

    /// The private key PEM contents were invalid or unsupported.
    #[error("private key is not a supported PEM private key")]
    InvalidPrivateKey {
        #[source]
        source: Option<anyhow::Error>,
    },

    /// The supplied certificate and key do not match.
    #[error("certificate and private key do not match")]
    CertificateKeyMismatch,
}
