//! Point-in-time view of every input object, and the source trait that
//! produces it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::routing_object::RoutingObject;
use super::service::{Endpoints, Secret, Service};
use crate::errors::Result;

/// Consistent set of all objects the graph builder reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    #[serde(default)]
    pub routing_objects: Vec<RoutingObject>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub endpoints: Vec<Endpoints>,
    #[serde(default)]
    pub secrets: Vec<Secret>,
}

impl ObjectSnapshot {
    pub fn object_count(&self) -> usize {
        self.routing_objects.len() + self.services.len() + self.endpoints.len() + self.secrets.len()
    }
}

/// The watch layer: returns the complete current object set on demand.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    async fn snapshot(&self) -> Result<ObjectSnapshot>;
}

#[async_trait]
impl<T: ObjectSource + ?Sized> ObjectSource for Arc<T> {
    async fn snapshot(&self) -> Result<ObjectSnapshot> {
        (**self).snapshot().await
    }
}

/// Fixed snapshot; handy for tests and one-shot runs.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    snapshot: Arc<std::sync::RwLock<ObjectSnapshot>>,
}

impl StaticSource {
    pub fn new(snapshot: ObjectSnapshot) -> Self {
        Self { snapshot: Arc::new(std::sync::RwLock::new(snapshot)) }
    }

    /// Swap the served snapshot. Callers still fire a [`ChangeNotifier`].
    pub fn replace(&self, snapshot: ObjectSnapshot) {
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}

#[async_trait]
impl ObjectSource for StaticSource {
    async fn snapshot(&self) -> Result<ObjectSnapshot> {
        let guard = self
            .snapshot
            .read()
            .map_err(|_| crate::Error::source("static snapshot lock poisoned"))?;
        Ok(guard.clone())
    }
}

/// Change signal fired by the watch layer on any add/update/delete.
///
/// Notifications coalesce: many calls before the driver wakes collapse into
/// one rebuild.
#[derive(Debug, Clone, Default)]
pub struct ChangeNotifier {
    inner: Arc<Notify>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.inner.notify_one();
    }

    /// Resolves once at least one notification arrived since the last wait.
    pub async fn notified(&self) {
        self.inner.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ObjectMeta;
    use std::time::Duration;

    #[tokio::test]
    async fn static_source_serves_replacement() {
        let source = StaticSource::new(ObjectSnapshot::default());
        assert_eq!(source.snapshot().await.unwrap().object_count(), 0);

        source.replace(ObjectSnapshot {
            services: vec![Service::new(ObjectMeta::new("ns", "api"))],
            ..Default::default()
        });
        assert_eq!(source.snapshot().await.unwrap().services.len(), 1);
    }

    #[tokio::test]
    async fn notifications_are_stored_until_awaited() {
        let notifier = ChangeNotifier::new();
        notifier.notify();
        notifier.notify();

        tokio::time::timeout(Duration::from_millis(100), notifier.notified())
            .await
            .expect("stored permit wakes the waiter");

        let second = tokio::time::timeout(Duration::from_millis(50), notifier.notified()).await;
        assert!(second.is_err(), "bursts collapse into a single permit");
    }
}
