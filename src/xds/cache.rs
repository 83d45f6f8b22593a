//! # Snapshot Cache
//!
//! Holds the latest translated content of every resource family. Each family
//! lives behind its own `watch` channel so a publish swaps the whole family
//! atomically and streams observe either the old or the new content, never a
//! mix. Publishes are serialized; the version counter is shared across
//! families so one publish stamps all of its changed families with the same
//! value.
//!
//! Version `0` means the family has never been published.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::resources::{ResourceFamily, ResourceSet, ResourceSnapshot};

/// Content of one family at one version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FamilySnapshot {
    pub version: u64,
    pub resources: Arc<ResourceSet>,
}

impl FamilySnapshot {
    pub fn is_published(&self) -> bool {
        self.version > 0
    }

    pub fn version_info(&self) -> String {
        self.version.to_string()
    }
}

/// Result of a publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Version stamped onto changed families; `None` when nothing changed.
    pub version: Option<u64>,
    pub changed: Vec<ResourceFamily>,
}

impl PublishOutcome {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

#[derive(Debug)]
struct FamilySlot {
    family: ResourceFamily,
    tx: watch::Sender<Arc<FamilySnapshot>>,
}

#[derive(Debug)]
pub struct SnapshotCache {
    slots: [FamilySlot; 5],
    counter: Mutex<u64>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    pub fn new() -> Self {
        let slots = ResourceFamily::ALL.map(|family| {
            let (tx, _rx) = watch::channel(Arc::new(FamilySnapshot::default()));
            FamilySlot { family, tx }
        });
        Self { slots, counter: Mutex::new(0) }
    }

    fn slot(&self, family: ResourceFamily) -> &FamilySlot {
        // ALL is ordered the same way the slots were created.
        let index = ResourceFamily::ALL.iter().position(|f| *f == family).unwrap_or(0);
        &self.slots[index]
    }

    /// Replace the cached content. Families whose content is unchanged keep
    /// their version and wake nobody.
    pub async fn publish(&self, snapshot: ResourceSnapshot) -> PublishOutcome {
        let mut counter = self.counter.lock().await;
        let first_publish = *counter == 0;

        let mut changed = Vec::new();
        let mut pending = Vec::new();
        for (family, resources) in snapshot.into_families() {
            let current = self.slot(family).tx.borrow().clone();
            if !first_publish && *current.resources == resources {
                continue;
            }
            changed.push(family);
            pending.push((family, resources));
        }

        if changed.is_empty() {
            debug!("Snapshot publish detected no changes");
            return PublishOutcome::default();
        }

        *counter += 1;
        let version = *counter;
        for (family, resources) in pending {
            let resource_count = resources.len();
            let next = Arc::new(FamilySnapshot { version, resources: Arc::new(resources) });
            self.slot(family).tx.send_replace(next);
            debug!(family = %family, version, resource_count, "Published family snapshot");
        }

        info!(
            version,
            families = ?changed.iter().map(|f| f.as_str()).collect::<Vec<_>>(),
            "Published snapshot"
        );
        PublishOutcome { version: Some(version), changed }
    }

    pub fn get(&self, family: ResourceFamily) -> Arc<FamilySnapshot> {
        self.slot(family).tx.borrow().clone()
    }

    pub fn subscribe(&self, family: ResourceFamily) -> watch::Receiver<Arc<FamilySnapshot>> {
        self.slot(family).tx.subscribe()
    }

    /// Wait until the family holds a version newer than `seen`. Returns `None`
    /// if `cancel` fires first.
    pub async fn wait_for_newer(
        &self,
        family: ResourceFamily,
        seen: u64,
        cancel: &CancellationToken,
    ) -> Option<Arc<FamilySnapshot>> {
        let mut rx = self.subscribe(family);
        tokio::select! {
            _ = cancel.cancelled() => None,
            result = rx.wait_for(|snapshot| snapshot.version > seen) => {
                result.ok().map(|snapshot| snapshot.clone())
            }
        }
    }

    pub fn families(&self) -> impl Iterator<Item = ResourceFamily> + '_ {
        self.slots.iter().map(|slot| slot.family)
    }
}
