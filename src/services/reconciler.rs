//! Reconciliation Driver
//!
//! Turns object changes into published xDS snapshots. One task runs the loop:
//! wait for a change notification, let the debounce window absorb the rest of
//! a burst, pull a snapshot from the source, then build, translate, publish
//! and report statuses in that order. A notification that arrives while a
//! rebuild is running schedules exactly one more rebuild.
//!
//! When the source fails, the cache keeps serving what it last published and
//! the driver retries with bounded exponential backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, ReconcileConfig};
use crate::domain::{AdmissionState, ChangeNotifier, ObjectSource, StatusSink};
use crate::graph::{self, BuildOptions};
use crate::observability::MetricsRecorder;
use crate::xds::{self, PublishOutcome, SnapshotCache, TranslateOptions};
use crate::Result;

/// Timing knobs for the driver loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerOptions {
    pub debounce: Duration,
    pub retry_initial: Duration,
    pub retry_max: Duration,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self::from_config(&ReconcileConfig::default())
    }
}

impl ReconcilerOptions {
    pub fn from_config(config: &ReconcileConfig) -> Self {
        let retry_initial = Duration::from_millis(config.retry_initial_ms.max(1));
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            retry_initial,
            retry_max: Duration::from_millis(config.retry_max_ms).max(retry_initial),
        }
    }
}

/// Outcome of one rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub publish: PublishOutcome,
    pub valid: usize,
    pub invalid: usize,
    pub orphaned: usize,
}

pub struct Reconciler {
    source: Arc<dyn ObjectSource>,
    sink: Arc<dyn StatusSink>,
    cache: Arc<SnapshotCache>,
    notifier: ChangeNotifier,
    build_options: BuildOptions,
    translate_options: TranslateOptions,
    options: ReconcilerOptions,
    metrics: MetricsRecorder,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("build_options", &self.build_options)
            .field("translate_options", &self.translate_options)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        sink: Arc<dyn StatusSink>,
        cache: Arc<SnapshotCache>,
        notifier: ChangeNotifier,
    ) -> Self {
        Self {
            source,
            sink,
            cache,
            notifier,
            build_options: BuildOptions::default(),
            translate_options: TranslateOptions::default(),
            options: ReconcilerOptions::default(),
            metrics: MetricsRecorder::new(),
        }
    }

    /// Apply every setting from `config` that shapes a rebuild.
    pub fn configured(mut self, config: &Config) -> Self {
        self.build_options = BuildOptions::from_config(config);
        self.translate_options = TranslateOptions::from_config(config);
        self.options = ReconcilerOptions::from_config(&config.reconcile);
        self
    }

    pub fn with_build_options(mut self, options: BuildOptions) -> Self {
        self.build_options = options;
        self
    }

    pub fn with_translate_options(mut self, options: TranslateOptions) -> Self {
        self.translate_options = options;
        self
    }

    pub fn with_options(mut self, options: ReconcilerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn notifier(&self) -> ChangeNotifier {
        self.notifier.clone()
    }

    /// Run one full rebuild. Source errors leave the cache untouched.
    #[instrument(skip(self), name = "reconcile")]
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let started = Instant::now();

        let snapshot = match self.source.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.metrics.record_reconcile(started.elapsed().as_secs_f64(), false);
                return Err(e);
            }
        };
        debug!(objects = snapshot.object_count(), "Pulled object snapshot");

        let output = graph::build(&snapshot, &self.build_options);
        let resources = xds::translate(&output.graph, &self.translate_options);
        let publish = self.cache.publish(resources).await;

        if let Some(version) = publish.version {
            for family in &publish.changed {
                self.metrics.record_publish(family.as_str(), version);
            }
        }

        let mut report = ReconcileReport { publish, ..Default::default() };
        for (object, status) in &output.statuses {
            match status.state {
                AdmissionState::Valid => report.valid += 1,
                AdmissionState::Invalid(_) => report.invalid += 1,
                AdmissionState::Orphaned(_) => report.orphaned += 1,
            }
            self.sink.report(object, status);
        }

        self.metrics.update_admission_counts(report.valid, report.invalid, report.orphaned);
        self.metrics.record_reconcile(started.elapsed().as_secs_f64(), true);

        info!(
            version = ?report.publish.version,
            changed = report.publish.changed.len(),
            valid = report.valid,
            invalid = report.invalid,
            orphaned = report.orphaned,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Reconciliation complete"
        );
        Ok(report)
    }

    /// Drive rebuilds until `cancel` fires. Starts with one rebuild.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            debounce_ms = self.options.debounce.as_millis() as u64,
            "Starting reconciliation driver"
        );
        let mut backoff: Option<Duration> = None;

        loop {
            match self.reconcile_once().await {
                Ok(_) => backoff = None,
                Err(e) => {
                    let delay = next_backoff(backoff, &self.options);
                    backoff = Some(delay);
                    warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Reconciliation failed; keeping last published configuration"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.notifier.notified() => {}
            }
            if !self.debounce(&cancel).await {
                break;
            }
        }

        info!("Reconciliation driver stopped");
    }

    /// Absorb further notifications until the debounce window closes. Returns
    /// `false` on cancellation.
    async fn debounce(&self, cancel: &CancellationToken) -> bool {
        if self.options.debounce.is_zero() {
            return !cancel.is_cancelled();
        }
        let deadline = tokio::time::Instant::now() + self.options.debounce;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(deadline) => return true,
                _ = self.notifier.notified() => {}
            }
        }
    }
}

fn next_backoff(previous: Option<Duration>, options: &ReconcilerOptions) -> Duration {
    match previous {
        None => options.retry_initial,
        Some(previous) => previous.saturating_mul(2).min(options.retry_max),
    }
}
