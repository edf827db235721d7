use crate::stats::StatsCollector;
use crate::store::UsageStore;
use anyhow::{anyhow, Result};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Handle to the token worker.
///
/// Tokens are decimal renderings of a `u64` counter seeded once at
/// load time from the maximum persisted token, so a fresh token is
/// always strictly greater than anything ever handed out, removals
/// included.
#[derive(Clone)]
pub struct TokenTracker {
    tx: mpsc::Sender<TokenCommand>,
}

enum TokenCommand {
    Start {
        fqdn: String,
        reply: oneshot::Sender<Result<String>>,
    },
    Stop {
        token: String,
        reply: oneshot::Sender<Result<()>>,
    },
    GetForFqdn {
        fqdn: String,
        reply: oneshot::Sender<Option<String>>,
    },
    GetAll {
        reply: oneshot::Sender<Vec<String>>,
    },
}

impl TokenTracker {
    pub fn spawn(
        store: Arc<dyn UsageStore>,
        stats: Arc<StatsCollector>,
        queue_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity);
        tokio::spawn(run_token_worker(store, stats, rx));
        Self { tx }
    }

    /// Returns the live token for `fqdn`, allocating one if needed.
    /// Calling twice without an intervening `stop_tracking` returns
    /// the same token.
    pub async fn start_tracking(&self, fqdn: impl Into<String>) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TokenCommand::Start {
                fqdn: fqdn.into(),
                reply,
            })
            .await
            .map_err(|_| worker_stopped())?;
        rx.await.map_err(|_| worker_stopped())?
    }

    /// Unknown tokens are a no-op success.
    pub async fn stop_tracking(&self, token: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TokenCommand::Stop {
                token: token.into(),
                reply,
            })
            .await
            .map_err(|_| worker_stopped())?;
        rx.await.map_err(|_| worker_stopped())?
    }

    pub async fn get_token_for_fqdn(&self, fqdn: impl Into<String>) -> Result<Option<String>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TokenCommand::GetForFqdn {
                fqdn: fqdn.into(),
                reply,
            })
            .await
            .map_err(|_| worker_stopped())?;
        rx.await.map_err(|_| worker_stopped())
    }

    pub async fn get_all_tokens(&self) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TokenCommand::GetAll { reply })
            .await
            .map_err(|_| worker_stopped())?;
        rx.await.map_err(|_| worker_stopped())
    }
}

fn worker_stopped() -> anyhow::Error {
    anyhow!("token tracker worker stopped")
}

struct TokenWorker {
    store: Arc<dyn UsageStore>,
    stats: Arc<StatsCollector>,
    /// token -> fqdn
    mappings: FxHashMap<String, String>,
    next_token: u64,
}

async fn run_token_worker(
    store: Arc<dyn UsageStore>,
    stats: Arc<StatsCollector>,
    mut rx: mpsc::Receiver<TokenCommand>,
) {
    let mappings = super::load_or_default("token mappings", || store.get_all_token_mappings()).await;
    let next_token = next_token_after(&mappings);
    let mut worker = TokenWorker {
        store,
        stats,
        mappings,
        next_token,
    };

    while let Some(cmd) = rx.recv().await {
        match cmd {
            TokenCommand::Start { fqdn, reply } => {
                let _ = reply.send(worker.start(fqdn).await);
            }
            TokenCommand::Stop { token, reply } => {
                let _ = reply.send(worker.stop(token).await);
            }
            TokenCommand::GetForFqdn { fqdn, reply } => {
                let _ = reply.send(worker.token_for(&fqdn));
            }
            TokenCommand::GetAll { reply } => {
                let mut tokens: Vec<String> = worker.mappings.keys().cloned().collect();
                tokens.sort();
                let _ = reply.send(tokens);
            }
        }
    }
}

impl TokenWorker {
    /// Linear scan; the mapping is small (one entry per tracked site).
    fn token_for(&self, fqdn: &str) -> Option<String> {
        self.mappings
            .iter()
            .find(|(_, mapped)| mapped.as_str() == fqdn)
            .map(|(token, _)| token.clone())
    }

    async fn start(&mut self, fqdn: String) -> Result<String> {
        if let Some(existing) = self.token_for(&fqdn) {
            return Ok(existing);
        }

        let token = self.next_token.to_string();
        let mut updated = self.mappings.clone();
        updated.insert(token.clone(), fqdn);

        if let Err(e) = self.store.set_token_mappings(&updated).await {
            self.stats.inc_store_failures();
            // Counter not consumed: state is exactly as before the call.
            return Err(e.context("token mapping not persisted"));
        }

        self.mappings = updated;
        self.next_token += 1;
        self.stats.inc_tokens_issued();
        Ok(token)
    }

    async fn stop(&mut self, token: String) -> Result<()> {
        if !self.mappings.contains_key(&token) {
            return Ok(());
        }

        let mut updated = self.mappings.clone();
        updated.remove(&token);

        if let Err(e) = self.store.set_token_mappings(&updated).await {
            self.stats.inc_store_failures();
            return Err(e.context("token removal not persisted"));
        }

        self.mappings = updated;
        Ok(())
    }
}

/// Allocation state is reconstructed once at load: one past the
/// largest persisted token. Keys that don't parse as u64 can only come
/// from a foreign writer; they stay in the map but don't feed the max.
fn next_token_after(mappings: &FxHashMap<String, String>) -> u64 {
    mappings
        .keys()
        .filter_map(|t| t.parse::<u64>().ok())
        .max()
        .map_or(0, |max| max + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> FxHashMap<String, String> {
        entries
            .iter()
            .map(|(t, f)| (t.to_string(), f.to_string()))
            .collect()
    }

    #[test]
    fn test_next_token_empty_map() {
        assert_eq!(next_token_after(&FxHashMap::default()), 0);
    }

    #[test]
    fn test_next_token_skips_unparseable() {
        let mappings = map(&[("3", "a.com"), ("17", "b.com"), ("bogus", "c.com")]);
        assert_eq!(next_token_after(&mappings), 18);
    }
}
