use anyhow::{bail, Result};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use usage_watch::stats::StatsCollector;
use usage_watch::store::{MemoryStore, UsageStore};
use usage_watch::tracker::types::WebsiteEvent;
use usage_watch::tracker::TokenTracker;

/// Fails the next N token writes; everything else delegates.
struct FlakyStore {
    inner: MemoryStore,
    failures_left: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(0),
        }
    }

    fn arm(&self, failures: usize) {
        self.failures_left.store(failures, Ordering::SeqCst);
    }
}

#[async_trait]
impl UsageStore for FlakyStore {
    async fn get_all_events(&self) -> Result<Vec<WebsiteEvent>> {
        self.inner.get_all_events().await
    }

    async fn add_events(&self, events: Vec<WebsiteEvent>) -> Result<()> {
        self.inner.add_events(events).await
    }

    async fn delete_all_events(&self) -> Result<()> {
        self.inner.delete_all_events().await
    }

    async fn delete_events_in_range(&self, start_ms: u64, end_ms: u64) -> Result<()> {
        self.inner.delete_events_in_range(start_ms, end_ms).await
    }

    async fn delete_events_by_domains(&self, fqdns: &[String]) -> Result<()> {
        self.inner.delete_events_by_domains(fqdns).await
    }

    async fn get_all_suspensions(&self) -> Result<Vec<String>> {
        self.inner.get_all_suspensions().await
    }

    async fn set_suspensions(&self, fqdns: &[String]) -> Result<()> {
        self.inner.set_suspensions(fqdns).await
    }

    async fn get_all_token_mappings(&self) -> Result<FxHashMap<String, String>> {
        self.inner.get_all_token_mappings().await
    }

    async fn set_token_mappings(&self, mappings: &FxHashMap<String, String>) -> Result<()> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            bail!("injected store failure");
        }
        self.inner.set_token_mappings(mappings).await
    }
}

fn spawn_tracker(store: Arc<dyn UsageStore>) -> TokenTracker {
    TokenTracker::spawn(store, StatsCollector::detached(), 16)
}

#[tokio::test]
async fn test_start_tracking_is_idempotent() {
    let tracker = spawn_tracker(Arc::new(MemoryStore::new()));

    let first = tracker.start_tracking("a.com").await.unwrap();
    let second = tracker.start_tracking("a.com").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(tracker.get_all_tokens().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_tokens_stay_strictly_monotonic_across_removals() {
    let tracker = spawn_tracker(Arc::new(MemoryStore::new()));

    let t_a = tracker.start_tracking("a.com").await.unwrap();
    let t_b = tracker.start_tracking("b.com").await.unwrap();
    assert!(t_b.parse::<u64>().unwrap() > t_a.parse::<u64>().unwrap());

    // Removing a.com must not free its number for reuse
    tracker.stop_tracking(t_a.clone()).await.unwrap();
    let t_c = tracker.start_tracking("c.com").await.unwrap();
    assert!(t_c.parse::<u64>().unwrap() > t_b.parse::<u64>().unwrap());
    assert_ne!(t_c, t_a);
}

#[tokio::test]
async fn test_stop_tracking_unknown_token_is_noop() {
    let tracker = spawn_tracker(Arc::new(MemoryStore::new()));

    let token = tracker.start_tracking("a.com").await.unwrap();
    tracker.stop_tracking("99999").await.unwrap();

    // The known mapping survived the no-op
    assert_eq!(
        tracker.get_token_for_fqdn("a.com").await.unwrap(),
        Some(token)
    );
}

#[tokio::test]
async fn test_token_lookup_by_fqdn() {
    let tracker = spawn_tracker(Arc::new(MemoryStore::new()));

    let token = tracker.start_tracking("a.com").await.unwrap();

    assert_eq!(
        tracker.get_token_for_fqdn("a.com").await.unwrap(),
        Some(token.clone())
    );
    assert_eq!(tracker.get_token_for_fqdn("b.com").await.unwrap(), None);

    tracker.stop_tracking(token).await.unwrap();
    assert_eq!(tracker.get_token_for_fqdn("a.com").await.unwrap(), None);
}

#[tokio::test]
async fn test_failed_persist_leaves_state_untouched() {
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    let tracker = spawn_tracker(store.clone());

    let t_a = tracker.start_tracking("a.com").await.unwrap();

    store.arm(1);
    assert!(tracker.start_tracking("b.com").await.is_err());

    // Memory, store and the allocation counter are all as before
    assert_eq!(tracker.get_all_tokens().await.unwrap(), vec![t_a.clone()]);
    assert_eq!(store.inner.get_all_token_mappings().await.unwrap().len(), 1);

    // Recovery hands out the number the failed call never consumed
    let t_b = tracker.start_tracking("b.com").await.unwrap();
    assert_eq!(
        t_b.parse::<u64>().unwrap(),
        t_a.parse::<u64>().unwrap() + 1
    );
}

#[tokio::test]
async fn test_allocation_counter_rebuilt_from_store() {
    let mut tokens = FxHashMap::default();
    tokens.insert("5".to_string(), "a.com".to_string());
    let seeded = MemoryStore::with_state(vec![], vec![], tokens);
    let tracker = spawn_tracker(Arc::new(seeded));

    // Existing mapping is honored
    assert_eq!(tracker.start_tracking("a.com").await.unwrap(), "5");

    // Fresh allocations start above the persisted maximum
    assert_eq!(tracker.start_tracking("b.com").await.unwrap(), "6");
}
