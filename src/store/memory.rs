use super::UsageStore;
use crate::tracker::types::WebsiteEvent;
use anyhow::Result;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::Mutex;

/// Ephemeral backend. Keeps the same ordering guarantees as the SQLite
/// adapter so the trackers cannot tell them apart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    events: Vec<WebsiteEvent>,
    suspensions: Vec<String>,
    tokens: FxHashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds state, for tests that need a "previous session".
    pub fn with_state(
        events: Vec<WebsiteEvent>,
        suspensions: Vec<String>,
        tokens: FxHashMap<String, String>,
    ) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                events,
                suspensions,
                tokens,
            }),
        }
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn get_all_events(&self) -> Result<Vec<WebsiteEvent>> {
        let inner = self.inner.lock().unwrap();
        let mut events = inner.events.clone();
        events.sort_by_key(|e| e.timestamp_ms);
        Ok(events)
    }

    async fn add_events(&self, events: Vec<WebsiteEvent>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.extend(events);
        Ok(())
    }

    async fn delete_all_events(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.clear();
        Ok(())
    }

    async fn delete_events_in_range(&self, start_ms: u64, end_ms: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .events
            .retain(|e| e.timestamp_ms < start_ms || e.timestamp_ms >= end_ms);
        Ok(())
    }

    async fn delete_events_by_domains(&self, fqdns: &[String]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.retain(|e| !fqdns.contains(&e.fqdn));
        Ok(())
    }

    async fn get_all_suspensions(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.suspensions.clone())
    }

    async fn set_suspensions(&self, fqdns: &[String]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.suspensions = fqdns.to_vec();
        Ok(())
    }

    async fn get_all_token_mappings(&self) -> Result<FxHashMap<String, String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tokens.clone())
    }

    async fn set_token_mappings(&self, mappings: &FxHashMap<String, String>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.tokens = mappings.clone();
        Ok(())
    }
}
