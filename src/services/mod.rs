//! Business logic services
//!
//! Long-running components that sit between the object source and the xDS
//! cache.

pub mod reconciler;

pub use reconciler::{ReconcileReport, Reconciler, ReconcilerOptions};
