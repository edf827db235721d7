pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryStore;
pub use self::sqlite::SqliteStore;

use crate::tracker::types::WebsiteEvent;
use anyhow::Result;
use async_trait::async_trait;
use rustc_hash::FxHashMap;

/// The persistence port behind all three trackers.
///
/// Mutations are all-or-nothing from the caller's perspective: `Ok(())`
/// means the store holds the new state, `Err` means it was left as-is.
/// Set-valued writes (`set_suspensions`, `set_token_mappings`) replace
/// the whole persisted set rather than applying a delta.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Returns every persisted event in non-decreasing timestamp order.
    async fn get_all_events(&self) -> Result<Vec<WebsiteEvent>>;
    async fn add_events(&self, events: Vec<WebsiteEvent>) -> Result<()>;
    async fn delete_all_events(&self) -> Result<()>;
    /// Deletes events with `start_ms <= timestamp < end_ms`.
    async fn delete_events_in_range(&self, start_ms: u64, end_ms: u64) -> Result<()>;
    async fn delete_events_by_domains(&self, fqdns: &[String]) -> Result<()>;

    async fn get_all_suspensions(&self) -> Result<Vec<String>>;
    async fn set_suspensions(&self, fqdns: &[String]) -> Result<()>;

    /// token -> fqdn
    async fn get_all_token_mappings(&self) -> Result<FxHashMap<String, String>>;
    async fn set_token_mappings(&self, mappings: &FxHashMap<String, String>) -> Result<()>;
}
