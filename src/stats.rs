use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::info;

/// Process-wide counters for the tracking pipeline. All increments are
/// relaxed; readers only ever see a snapshot.
#[derive(Debug, Default)]
pub struct StatsCollector {
    page_signals: AtomicU64,
    events_recorded: AtomicU64,
    events_rejected: AtomicU64,
    suspended_hits: AtomicU64,
    suspension_changes: AtomicU64,
    tokens_issued: AtomicU64,
    store_failures: AtomicU64,
    store_retries: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub page_signals: u64,
    pub events_recorded: u64,
    pub events_rejected: u64,
    pub suspended_hits: u64,
    pub suspension_changes: u64,
    pub tokens_issued: u64,
    pub store_failures: u64,
    pub store_retries: u64,
}

impl StatsCollector {
    pub fn new(log_interval_sec: u64) -> Arc<Self> {
        let stats = Arc::new(Self::default());

        // Spawn background dumper
        let stats_clone = stats.clone();
        tokio::spawn(async move {
            stats_clone.run_logger(log_interval_sec).await;
        });

        stats
    }

    /// A collector with no dump task, for tests and embedding.
    pub fn detached() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_page_signals(&self) {
        self.page_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_recorded(&self) {
        self.events_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_suspended_hits(&self) {
        self.suspended_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_suspension_changes(&self) {
        self.suspension_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tokens_issued(&self) {
        self.tokens_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_store_failures(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_store_retries(&self) {
        self.store_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            page_signals: self.page_signals.load(Ordering::Relaxed),
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            suspended_hits: self.suspended_hits.load(Ordering::Relaxed),
            suspension_changes: self.suspension_changes.load(Ordering::Relaxed),
            tokens_issued: self.tokens_issued.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            store_retries: self.store_retries.load(Ordering::Relaxed),
        }
    }

    async fn run_logger(&self, log_interval_sec: u64) {
        let mut interval = time::interval(Duration::from_secs(log_interval_sec));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.dump_stats();
        }
    }

    fn dump_stats(&self) {
        let snap = self.get_snapshot();
        info!(
            "STATS DUMP: Signals: {}, Events: {} ({} rejected), SuspendedHits: {}, \
             SuspensionChanges: {}, Tokens: {}, StoreFailures: {} ({} retried)",
            snap.page_signals,
            snap.events_recorded,
            snap.events_rejected,
            snap.suspended_hits,
            snap.suspension_changes,
            snap.tokens_issued,
            snap.store_failures,
            snap.store_retries,
        );
    }
}
