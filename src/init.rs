//! Initialization helpers for the application startup.

use crate::config::Config;
use crate::store::{MemoryStore, SqliteStore, UsageStore};
use std::sync::Arc;
use tracing::{error, info};

/// Sets up the tracing subscriber with the configured filters.
pub fn setup_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

/// Selects the store backend. A SQLite store that fails to open or
/// migrate falls back to the memory store so the trackers always have
/// something to run against.
pub fn init_store(config: &Config) -> Arc<dyn UsageStore> {
    if config.store.backend == "sqlite" {
        match open_sqlite(&config.store.sqlite_path) {
            Ok(store) => {
                info!("Using SQLite store at {}", config.store.sqlite_path);
                return Arc::new(store);
            }
            Err(e) => {
                error!(
                    "Failed to initialize SQLite store, falling back to memory: {:#}",
                    e
                );
            }
        }
    } else if config.store.backend != "memory" {
        info!(
            "Unknown store backend '{}', defaulting to memory",
            config.store.backend
        );
    }

    info!("Using in-memory store (state is not persisted)");
    Arc::new(MemoryStore::new())
}

fn open_sqlite(path: &str) -> anyhow::Result<SqliteStore> {
    let store = SqliteStore::new(path)?;
    store.initialize()?;
    Ok(store)
}
