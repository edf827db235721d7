use super::UsageStore;
use crate::tracker::types::{parse_kind, WebsiteEvent};
use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use rustc_hash::FxHashMap;
use std::sync::Mutex;
use tracing::info;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS website_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                fqdn TEXT NOT NULL,
                kind TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS suspensions (
                fqdn TEXT PRIMARY KEY
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS token_mappings (
                token TEXT PRIMARY KEY,
                fqdn TEXT NOT NULL
            )",
            [],
        )?;

        // Indices
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON website_events(timestamp)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_fqdn ON website_events(fqdn)",
            [],
        )?;

        info!("SQLite usage store initialized");
        Ok(())
    }
}

#[async_trait]
impl UsageStore for SqliteStore {
    async fn get_all_events(&self) -> Result<Vec<WebsiteEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT timestamp, fqdn, kind FROM website_events ORDER BY timestamp ASC, id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            let timestamp: i64 = row.get(0)?;
            let fqdn: String = row.get(1)?;
            let kind: String = row.get(2)?;
            Ok(WebsiteEvent {
                timestamp_ms: timestamp as u64,
                fqdn,
                kind: parse_kind(&kind),
            })
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    async fn add_events(&self, events: Vec<WebsiteEvent>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO website_events (timestamp, fqdn, kind) VALUES (?1, ?2, ?3)",
            )?;
            for event in &events {
                stmt.execute(params![
                    event.timestamp_ms as i64,
                    event.fqdn,
                    event.kind.as_str()
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete_all_events(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM website_events", [])?;
        Ok(())
    }

    async fn delete_events_in_range(&self, start_ms: u64, end_ms: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare_cached("DELETE FROM website_events WHERE timestamp >= ?1 AND timestamp < ?2")?;
        stmt.execute(params![start_ms as i64, end_ms as i64])?;
        Ok(())
    }

    async fn delete_events_by_domains(&self, fqdns: &[String]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM website_events WHERE fqdn = ?1")?;
            for fqdn in fqdns {
                stmt.execute(params![fqdn])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_all_suspensions(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT fqdn FROM suspensions")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut fqdns = Vec::new();
        for row in rows {
            fqdns.push(row?);
        }
        Ok(fqdns)
    }

    async fn set_suspensions(&self, fqdns: &[String]) -> Result<()> {
        // Whole-set replacement, not a delta
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        {
            tx.execute("DELETE FROM suspensions", [])?;
            let mut stmt = tx.prepare_cached("INSERT INTO suspensions (fqdn) VALUES (?1)")?;
            for fqdn in fqdns {
                stmt.execute(params![fqdn])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_all_token_mappings(&self) -> Result<FxHashMap<String, String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT token, fqdn FROM token_mappings")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut mappings = FxHashMap::default();
        for row in rows {
            let (token, fqdn) = row?;
            mappings.insert(token, fqdn);
        }
        Ok(mappings)
    }

    async fn set_token_mappings(&self, mappings: &FxHashMap<String, String>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        {
            tx.execute("DELETE FROM token_mappings", [])?;
            let mut stmt =
                tx.prepare_cached("INSERT INTO token_mappings (token, fqdn) VALUES (?1, ?2)")?;
            for (token, fqdn) in mappings {
                stmt.execute(params![token, fqdn])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
