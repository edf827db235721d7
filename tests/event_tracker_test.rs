use anyhow::{bail, Result};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use usage_watch::stats::StatsCollector;
use usage_watch::store::{MemoryStore, UsageStore};
use usage_watch::tracker::types::{EventKind, WebsiteEvent};
use usage_watch::tracker::EventTracker;

/// Delegates to a MemoryStore but fails the next N mutating calls.
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

    fn trip(&self) -> Result<()> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            bail!("injected store failure");
        }
        Ok(())
    }
}

#[async_trait]
impl UsageStore for FlakyStore {
    async fn get_all_events(&self) -> Result<Vec<WebsiteEvent>> {
        self.inner.get_all_events().await
    }

    async fn add_events(&self, events: Vec<WebsiteEvent>) -> Result<()> {
        self.trip()?;
        self.inner.add_events(events).await
    }

    async fn delete_all_events(&self) -> Result<()> {
        self.trip()?;
        self.inner.delete_all_events().await
    }

    async fn delete_events_in_range(&self, start_ms: u64, end_ms: u64) -> Result<()> {
        self.trip()?;
        self.inner.delete_events_in_range(start_ms, end_ms).await
    }

    async fn delete_events_by_domains(&self, fqdns: &[String]) -> Result<()> {
        self.trip()?;
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
        self.inner.set_token_mappings(mappings).await
    }
}

fn spawn_tracker(store: Arc<dyn UsageStore>) -> EventTracker {
    EventTracker::spawn(store, StatsCollector::detached(), 16)
}

#[tokio::test]
async fn test_half_open_range_queries() {
    let tracker = spawn_tracker(Arc::new(MemoryStore::new()));

    tracker
        .add_event(WebsiteEvent::start(100, "a.com"))
        .await
        .unwrap();
    tracker
        .add_event(WebsiteEvent::stop(200, "a.com"))
        .await
        .unwrap();

    // Start bound inclusive, end bound exclusive
    let hits = tracker.query_events(50, 150).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].timestamp_ms, 100);
    assert_eq!(hits[0].kind, EventKind::Start);

    let hits = tracker.query_events(100, 200).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].timestamp_ms, 100);

    let hits = tracker.query_events(0, 1000).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].timestamp_ms, 100);
    assert_eq!(hits[1].timestamp_ms, 200);
    assert_eq!(hits[1].kind, EventKind::Stop);
}

#[tokio::test]
async fn test_empty_range_is_empty() {
    let tracker = spawn_tracker(Arc::new(MemoryStore::new()));

    tracker
        .add_event(WebsiteEvent::start(100, "a.com"))
        .await
        .unwrap();

    assert!(tracker.query_events(100, 100).await.unwrap().is_empty());
    assert!(tracker.query_events(0, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_equal_timestamps_are_accepted_in_order() {
    let tracker = spawn_tracker(Arc::new(MemoryStore::new()));

    tracker
        .add_event(WebsiteEvent::stop(100, "a.com"))
        .await
        .unwrap();
    tracker
        .add_event(WebsiteEvent::start(100, "b.com"))
        .await
        .unwrap();

    let hits = tracker.query_events(0, 1000).await.unwrap();
    assert_eq!(hits.len(), 2);
    // Insertion order preserved for equal timestamps
    assert_eq!(hits[0].fqdn, "a.com");
    assert_eq!(hits[1].fqdn, "b.com");
}

#[tokio::test]
async fn test_out_of_order_event_is_rejected() {
    let tracker = spawn_tracker(Arc::new(MemoryStore::new()));

    tracker
        .add_event(WebsiteEvent::start(200, "a.com"))
        .await
        .unwrap();

    let result = tracker.add_event(WebsiteEvent::stop(100, "a.com")).await;
    assert!(result.is_err());

    // The rejected event left no trace
    let hits = tracker.query_events(0, 1000).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].timestamp_ms, 200);
}

#[tokio::test]
async fn test_failed_add_leaves_state_untouched() {
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    let tracker = spawn_tracker(store.clone());

    tracker
        .add_event(WebsiteEvent::start(100, "a.com"))
        .await
        .unwrap();

    store.arm(1);
    let result = tracker.add_event(WebsiteEvent::stop(200, "a.com")).await;
    assert!(result.is_err());

    let hits = tracker.query_events(0, 1000).await.unwrap();
    assert_eq!(hits.len(), 1, "failed write must not reach memory");
    assert_eq!(store.inner.get_all_events().await.unwrap().len(), 1);

    // The same call succeeds once the store recovers
    tracker
        .add_event(WebsiteEvent::stop(200, "a.com"))
        .await
        .unwrap();
    assert_eq!(tracker.query_events(0, 1000).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_clear_range_retries_once() {
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    let tracker = spawn_tracker(store.clone());

    tracker
        .add_event(WebsiteEvent::start(100, "a.com"))
        .await
        .unwrap();
    tracker
        .add_event(WebsiteEvent::start(500, "b.com"))
        .await
        .unwrap();

    // A single failure is absorbed by the automatic retry
    store.arm(1);
    tracker.clear_range(0, 200).await.unwrap();

    let hits = tracker.query_events(0, 1000).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].fqdn, "b.com");
}

#[tokio::test]
async fn test_clear_fails_after_second_failure() {
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    let tracker = spawn_tracker(store.clone());

    tracker
        .add_event(WebsiteEvent::start(100, "a.com"))
        .await
        .unwrap();

    // Failure plus failed retry surfaces the error and changes nothing
    store.arm(2);
    assert!(tracker.clear_all().await.is_err());

    assert_eq!(tracker.query_events(0, 1000).await.unwrap().len(), 1);
    assert_eq!(store.inner.get_all_events().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_clear_by_domains() {
    let tracker = spawn_tracker(Arc::new(MemoryStore::new()));

    tracker
        .add_event(WebsiteEvent::start(100, "a.com"))
        .await
        .unwrap();
    tracker
        .add_event(WebsiteEvent::start(200, "b.com"))
        .await
        .unwrap();
    tracker
        .add_event(WebsiteEvent::stop(300, "a.com"))
        .await
        .unwrap();

    tracker
        .clear_by_domains(vec!["a.com".to_string()])
        .await
        .unwrap();

    let hits = tracker.query_events(0, 1000).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].fqdn, "b.com");
}

#[tokio::test]
async fn test_initial_load_restores_previous_session() {
    let seeded = MemoryStore::with_state(
        vec![
            WebsiteEvent::start(10, "a.com"),
            WebsiteEvent::stop(20, "a.com"),
        ],
        vec![],
        FxHashMap::default(),
    );
    let tracker = spawn_tracker(Arc::new(seeded));

    // The first query is answered after the initial load completes
    let hits = tracker.query_events(0, 100).await.unwrap();
    assert_eq!(hits.len(), 2);

    // And the ordering invariant carries over from the loaded tail
    assert!(tracker.add_event(WebsiteEvent::start(5, "b.com")).await.is_err());
    tracker
        .add_event(WebsiteEvent::start(30, "b.com"))
        .await
        .unwrap();
}
