//! Manifest file source.
//!
//! Reads every object from one YAML (or JSON) document with the top-level
//! keys `routing_objects`, `services`, `endpoints` and `secrets`. Changes are
//! detected by polling the file's modification time and size.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{ChangeNotifier, ObjectSnapshot, ObjectSource};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

/// Identity of one version of the file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn parse(contents: &str) -> Result<ObjectSnapshot> {
        if contents.trim().is_empty() {
            return Ok(ObjectSnapshot::default());
        }
        serde_yaml::from_str(contents)
            .map_err(|e| Error::source(format!("Invalid object manifest: {}", e)))
    }

    async fn fingerprint(&self) -> Option<Fingerprint> {
        let metadata = tokio::fs::metadata(&self.path).await.ok()?;
        Some(Fingerprint { modified: metadata.modified().ok(), len: metadata.len() })
    }

    /// Poll the file every `interval` and fire `notifier` whenever it changes,
    /// appears or disappears. Stops when `cancel` fires.
    pub async fn watch(
        self,
        notifier: ChangeNotifier,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        info!(path = %self.path.display(), interval_ms = interval.as_millis() as u64, "Watching object manifest");
        let mut last = self.fingerprint().await;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let current = self.fingerprint().await;
            if current != last {
                debug!(path = %self.path.display(), "Object manifest changed");
                last = current;
                notifier.notify();
            }
        }
    }
}

#[async_trait]
impl ObjectSource for FileSource {
    async fn snapshot(&self) -> Result<ObjectSnapshot> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "Failed to read object manifest");
            Error::source(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        Self::parse(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
routing_objects:
  - namespace: shop
    name: storefront
    hostnames: [shop.example.com]
    routes:
      - match:
          path:
            prefix: /
        backends:
          - service: web
            port: 80
services:
  - namespace: shop
    name: web
    ports:
      - port: 80
endpoints:
  - namespace: shop
    name: web
    subsets: []
"#;

    #[test]
    fn parses_manifest() {
        let snapshot = FileSource::parse(MANIFEST).unwrap();
        assert_eq!(snapshot.routing_objects.len(), 1);
        assert_eq!(snapshot.routing_objects[0].hostnames, vec!["shop.example.com"]);
        assert_eq!(snapshot.services[0].ports[0].port, 80);
        assert!(snapshot.secrets.is_empty());
    }

    #[test]
    fn empty_manifest_is_empty_snapshot() {
        assert_eq!(FileSource::parse("  \n").unwrap(), ObjectSnapshot::default());
    }

    #[test]
    fn malformed_manifest_is_a_source_error() {
        assert!(matches!(FileSource::parse("routing_objects: 7"), Err(Error::Source(_))));
    }

    #[tokio::test]
    async fn missing_file_is_a_source_error() {
        let source = FileSource::new("/nonexistent/gateplane/objects.yaml");
        assert!(matches!(source.snapshot().await, Err(Error::Source(_))));
    }

    #[tokio::test]
    async fn reads_manifest_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.yaml");
        std::fs::write(&path, MANIFEST).unwrap();

        let snapshot = FileSource::new(&path).snapshot().await.unwrap();
        assert_eq!(snapshot.object_count(), 3);
    }

    #[tokio::test]
    async fn watch_fires_when_the_manifest_appears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.yaml");
        let notifier = ChangeNotifier::new();
        let cancel = CancellationToken::new();

        let watcher = tokio::spawn(FileSource::new(&path).watch(
            notifier.clone(),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        std::fs::write(&path, MANIFEST).unwrap();
        tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_secs(2), notifier.notified()).await
        );

        cancel.cancel();
        tokio_test::assert_ok!(watcher.await);
    }
}
