//! Envoy xDS (eXtended Discovery Service) implementation
//!
//! Translates the dependency graph into Envoy resources, caches the latest
//! snapshot per resource family, and serves it over gRPC:
//! - ADS (Aggregated Discovery Service)
//! - LDS, RDS, CDS, EDS and SDS single-family services

pub mod cache;
pub mod cluster;
pub mod endpoint;
pub mod listener;
pub mod resources;
pub mod route;
pub mod secret;
pub mod server;
pub mod services;

pub use cache::{FamilySnapshot, PublishOutcome, SnapshotCache};
pub use resources::{
    translate, BuiltResource, ResourceFamily, ResourceSet, ResourceSnapshot, TranslateOptions,
};
pub use server::serve;
