//! Logging setup and migration counters

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber, honoring `RUST_LOG` (default `info`)
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Counters shared by the batch engine and the asset queue
#[derive(Debug, Default)]
pub struct Metrics {
    batches_submitted: AtomicU64,
    entities_migrated: AtomicU64,
    entities_failed: AtomicU64,
    assets_skipped: AtomicU64,
    assets_queued: AtomicU64,
    assets_uploaded: AtomicU64,
    upload_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_submitted(&self) {
        self.batches_submitted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "batches_submitted", "Metric incremented");
    }

    pub fn entity_migrated(&self) {
        self.entities_migrated.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "entities_migrated", "Metric incremented");
    }

    pub fn entity_failed(&self) {
        self.entities_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "entities_failed", "Metric incremented");
    }

    pub fn asset_skipped(&self) {
        self.assets_skipped.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "assets_skipped", "Metric incremented");
    }

    pub fn asset_queued(&self) {
        self.assets_queued.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "assets_queued", "Metric incremented");
    }

    pub fn asset_uploaded(&self) {
        self.assets_uploaded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "assets_uploaded", "Metric incremented");
    }

    pub fn upload_failed(&self) {
        self.upload_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "upload_failures", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_submitted: self.batches_submitted.load(Ordering::Relaxed),
            entities_migrated: self.entities_migrated.load(Ordering::Relaxed),
            entities_failed: self.entities_failed.load(Ordering::Relaxed),
            assets_skipped: self.assets_skipped.load(Ordering::Relaxed),
            assets_queued: self.assets_queued.load(Ordering::Relaxed),
            assets_uploaded: self.assets_uploaded.load(Ordering::Relaxed),
            upload_failures: self.upload_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub batches_submitted: u64,
    pub entities_migrated: u64,
    pub entities_failed: u64,
    pub assets_skipped: u64,
    pub assets_queued: u64,
    pub assets_uploaded: u64,
    pub upload_failures: u64,
}
