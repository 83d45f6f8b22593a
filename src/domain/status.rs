//! Admission status and the sink that carries it out of the core.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

use super::id::ObjectRef;

/// Why a rule or object was not (fully) admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKind {
    RouteConflict,
    SecretNotFound,
    SecretInvalid,
    TlsConflict,
    ServiceNotFound,
    ServicePortNotFound,
    MalformedObject,
    IncludeNotFound,
    IncludeCycle,
    NotIncluded,
}

impl ReasonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonKind::RouteConflict => "route conflict",
            ReasonKind::SecretNotFound => "secret not found",
            ReasonKind::SecretInvalid => "secret invalid",
            ReasonKind::TlsConflict => "tls conflict",
            ReasonKind::ServiceNotFound => "service not found",
            ReasonKind::ServicePortNotFound => "service port not found",
            ReasonKind::MalformedObject => "malformed object",
            ReasonKind::IncludeNotFound => "include not found",
            ReasonKind::IncludeCycle => "include cycle",
            ReasonKind::NotIncluded => "not included by any root",
        }
    }
}

impl fmt::Display for ReasonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reason {
    pub kind: ReasonKind,
    pub message: String,
}

impl Reason {
    pub fn new(kind: ReasonKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// Structured detail pointing at the rule or host that was affected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub reason: Reason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason")]
pub enum AdmissionState {
    Valid,
    Invalid(Reason),
    Orphaned(Reason),
}

/// Result of admitting one routing object in one build cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionStatus {
    #[serde(flatten)]
    pub state: AdmissionState,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<StatusDetail>,
}

impl AdmissionStatus {
    pub fn valid(details: Vec<StatusDetail>) -> Self {
        Self { state: AdmissionState::Valid, details }
    }

    pub fn invalid(reason: Reason, details: Vec<StatusDetail>) -> Self {
        Self { state: AdmissionState::Invalid(reason), details }
    }

    pub fn orphaned(reason: Reason) -> Self {
        Self { state: AdmissionState::Orphaned(reason), details: Vec::new() }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.state, AdmissionState::Valid)
    }

    /// Top-level reason, if the object is not Valid.
    pub fn reason(&self) -> Option<&Reason> {
        match &self.state {
            AdmissionState::Valid => None,
            AdmissionState::Invalid(reason) | AdmissionState::Orphaned(reason) => Some(reason),
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            AdmissionState::Valid => "valid",
            AdmissionState::Invalid(_) => "invalid",
            AdmissionState::Orphaned(_) => "orphaned",
        }
    }

    /// Details carrying the given reason kind.
    pub fn details_of(&self, kind: ReasonKind) -> impl Iterator<Item = &StatusDetail> {
        self.details.iter().filter(move |d| d.reason.kind == kind)
    }
}

/// Receives admission results. Delivery and retry are the sink's concern.
pub trait StatusSink: Send + Sync {
    fn report(&self, object: &ObjectRef, status: &AdmissionStatus);
}

impl<T: StatusSink + ?Sized> StatusSink for Arc<T> {
    fn report(&self, object: &ObjectRef, status: &AdmissionStatus) {
        (**self).report(object, status)
    }
}

/// Writes every status as a structured log event.
#[derive(Debug, Clone, Default)]
pub struct LoggingStatusSink;

impl StatusSink for LoggingStatusSink {
    fn report(&self, object: &ObjectRef, status: &AdmissionStatus) {
        match status.reason() {
            None => info!(
                object = %object,
                status = status.state_name(),
                details = status.details.len(),
                "Object admitted"
            ),
            Some(reason) => warn!(
                object = %object,
                status = status.state_name(),
                reason = %reason,
                "Object not admitted"
            ),
        }
    }
}

/// Keeps the most recent status per object.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatusSink {
    statuses: Arc<DashMap<ObjectRef, AdmissionStatus>>,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, object: &ObjectRef) -> Option<AdmissionStatus> {
        self.statuses.get(object).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

impl StatusSink for MemoryStatusSink {
    fn report(&self, object: &ObjectRef, status: &AdmissionStatus) {
        self.statuses.insert(object.clone(), status.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_phrases_are_stable() {
        assert_eq!(ReasonKind::SecretNotFound.to_string(), "secret not found");
        assert_eq!(ReasonKind::RouteConflict.to_string(), "route conflict");
        assert_eq!(
            Reason::new(ReasonKind::ServiceNotFound, "service default/api does not exist").to_string(),
            "service not found: service default/api does not exist"
        );
    }

    #[test]
    fn memory_sink_keeps_latest() {
        let sink = MemoryStatusSink::new();
        let object = ObjectRef::routing_object("ns", "web");
        sink.report(&object, &AdmissionStatus::invalid(Reason::new(ReasonKind::MalformedObject, ""), vec![]));
        sink.report(&object, &AdmissionStatus::valid(vec![]));
        assert_eq!(sink.len(), 1);
        assert!(sink.get(&object).unwrap().is_valid());
    }

    #[test]
    fn status_serializes_with_state_tag() {
        let status = AdmissionStatus::invalid(Reason::new(ReasonKind::SecretNotFound, "missing"), vec![]);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "Invalid");
        assert_eq!(json["reason"]["kind"], "secret_not_found");
    }
}
