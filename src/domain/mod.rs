//! Domain layer
//!
//! Typed input objects (routing objects, services, endpoints, secrets), the
//! admission status produced for them, and the two seams to the outside
//! world: [`ObjectSource`] for reading snapshots and [`StatusSink`] for
//! reporting results. Nothing here depends on Envoy or gRPC.
//!
//! ## Module Organization
//!
//! - `id`: object identity and metadata
//! - `route`: rule, match and backend shapes
//! - `routing_object`: routing objects, TLS and includes
//! - `service`: services, endpoints and secrets
//! - `snapshot`: the consistent object set, sources and change notification
//! - `status`: admission status and sinks

pub mod id;
pub mod route;
pub mod routing_object;
pub mod service;
pub mod snapshot;
pub mod status;

pub use id::{split_namespaced, ObjectKind, ObjectMeta, ObjectRef};
pub use route::{
    BackendRef, HeaderMatch, HeaderMatcher, HeadersPolicy, LoadBalancerStrategy, PathMatch,
    QueryParamMatch, RetryPolicy, RouteMatch, RouteRule, TimeoutPolicy,
};
pub use routing_object::{Include, RoutingObject, TlsSpec};
pub use service::{EndpointPort, EndpointSubset, Endpoints, Secret, Service, ServicePort, SocketEndpoint};
pub use snapshot::{ChangeNotifier, ObjectSnapshot, ObjectSource, StaticSource};
pub use status::{
    AdmissionState, AdmissionStatus, LoggingStatusSink, MemoryStatusSink, Reason, ReasonKind,
    StatusDetail, StatusSink,
};
