//! # Error Handling
//!
//! Error types for the gateplane control plane, built on `thiserror`.
//!
//! Per-object admission problems are *not* errors: they are reported through
//! [`crate::domain::AdmissionStatus`] and never abort a build. The variants here
//! cover process-level failures (configuration, object source, transport).

pub mod tls;

pub use tls::TlsError;

/// Custom result type for gateplane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateplane control plane
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Field-level validation failures
    #[error("Validation error: {0}")]
    Validation(String),

    /// The object source could not deliver a snapshot
    #[error("Object source error: {0}")]
    Source(String),

    /// Network transport errors (gRPC)
    #[error("Transport error: {0}")]
    Transport(String),

    /// TLS material errors
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    /// Create a new object source error
    pub fn source<S: Into<String>>(message: S) -> Self {
        Self::Source(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Whether a reconcile that hit this error should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Source(_) | Self::Io(_) | Self::Internal(_))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => format!("{}: {}", field, message),
                    None => format!("{}: {}", field, e.code),
                })
            })
            .collect();

        if messages.is_empty() {
            Self::Validation(errors.to_string())
        } else {
            Self::Validation(messages.join(", "))
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Config(format!("invalid YAML: {}", error))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Config(format!("invalid JSON: {}", error))
    }
}
