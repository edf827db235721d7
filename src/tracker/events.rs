use super::types::WebsiteEvent;
use crate::stats::StatsCollector;
use crate::store::UsageStore;
use anyhow::{anyhow, bail, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Handle to the event worker.
///
/// Clones are cheap and all feed one FIFO queue, so every mutation
/// serializes behind the previous one and behind the initial load;
/// the in-memory list is never observed mid-update. Invariant: the
/// list stays in non-decreasing timestamp order, and `add_event`
/// rejects anything older than the current tail.
#[derive(Clone)]
pub struct EventTracker {
    tx: mpsc::Sender<EventCommand>,
}

enum EventCommand {
    Query {
        start_ms: u64,
        end_ms: u64,
        reply: oneshot::Sender<Vec<WebsiteEvent>>,
    },
    Add {
        event: WebsiteEvent,
        reply: oneshot::Sender<Result<()>>,
    },
    ClearAll {
        reply: oneshot::Sender<Result<()>>,
    },
    ClearRange {
        start_ms: u64,
        end_ms: u64,
        reply: oneshot::Sender<Result<()>>,
    },
    ClearDomains {
        fqdns: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
}

impl EventTracker {
    pub fn spawn(
        store: Arc<dyn UsageStore>,
        stats: Arc<StatsCollector>,
        queue_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity);
        tokio::spawn(run_event_worker(store, stats, rx));
        Self { tx }
    }

    /// Snapshot copy of events with `start_ms <= timestamp < end_ms`,
    /// in insertion order.
    pub async fn query_events(&self, start_ms: u64, end_ms: u64) -> Result<Vec<WebsiteEvent>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EventCommand::Query {
                start_ms,
                end_ms,
                reply,
            })
            .await
            .map_err(|_| worker_stopped())?;
        rx.await.map_err(|_| worker_stopped())
    }

    pub async fn add_event(&self, event: WebsiteEvent) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EventCommand::Add { event, reply })
            .await
            .map_err(|_| worker_stopped())?;
        rx.await.map_err(|_| worker_stopped())?
    }

    pub async fn clear_all(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EventCommand::ClearAll { reply })
            .await
            .map_err(|_| worker_stopped())?;
        rx.await.map_err(|_| worker_stopped())?
    }

    pub async fn clear_range(&self, start_ms: u64, end_ms: u64) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EventCommand::ClearRange {
                start_ms,
                end_ms,
                reply,
            })
            .await
            .map_err(|_| worker_stopped())?;
        rx.await.map_err(|_| worker_stopped())?
    }

    pub async fn clear_by_domains(&self, fqdns: Vec<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EventCommand::ClearDomains { fqdns, reply })
            .await
            .map_err(|_| worker_stopped())?;
        rx.await.map_err(|_| worker_stopped())?
    }
}

fn worker_stopped() -> anyhow::Error {
    anyhow!("event tracker worker stopped")
}

struct EventWorker {
    store: Arc<dyn UsageStore>,
    stats: Arc<StatsCollector>,
    events: Vec<WebsiteEvent>,
}

async fn run_event_worker(
    store: Arc<dyn UsageStore>,
    stats: Arc<StatsCollector>,
    mut rx: mpsc::Receiver<EventCommand>,
) {
    // Commands sent while this load runs queue in the channel, which is
    // what realizes LOADING -> READY without extra states.
    let events = super::load_or_default("event list", || store.get_all_events()).await;
    let mut worker = EventWorker {
        store,
        stats,
        events,
    };

    while let Some(cmd) = rx.recv().await {
        match cmd {
            EventCommand::Query {
                start_ms,
                end_ms,
                reply,
            } => {
                let _ = reply.send(worker.query(start_ms, end_ms));
            }
            EventCommand::Add { event, reply } => {
                let _ = reply.send(worker.add(event).await);
            }
            EventCommand::ClearAll { reply } => {
                let _ = reply.send(worker.clear_all().await);
            }
            EventCommand::ClearRange {
                start_ms,
                end_ms,
                reply,
            } => {
                let _ = reply.send(worker.clear_range(start_ms, end_ms).await);
            }
            EventCommand::ClearDomains { fqdns, reply } => {
                let _ = reply.send(worker.clear_domains(fqdns).await);
            }
        }
    }
}

impl EventWorker {
    fn query(&self, start_ms: u64, end_ms: u64) -> Vec<WebsiteEvent> {
        let (lo, hi) = range_bounds(&self.events, start_ms, end_ms);
        self.events[lo..hi].to_vec()
    }

    async fn add(&mut self, event: WebsiteEvent) -> Result<()> {
        if let Some(last) = self.events.last() {
            if event.timestamp_ms < last.timestamp_ms {
                self.stats.inc_events_rejected();
                bail!(
                    "event for {} at {}ms is older than the stored tail ({}ms)",
                    event.fqdn,
                    event.timestamp_ms,
                    last.timestamp_ms
                );
            }
        }

        // Persist first; memory only moves on confirmed persistence.
        if let Err(e) = self.store.add_events(vec![event.clone()]).await {
            self.stats.inc_store_failures();
            return Err(e.context("event not recorded"));
        }

        self.events.push(event);
        self.stats.inc_events_recorded();
        Ok(())
    }

    async fn clear_all(&mut self) -> Result<()> {
        self.persist_with_retry("clear all events", || self.store.delete_all_events())
            .await?;
        self.events.clear();
        Ok(())
    }

    async fn clear_range(&mut self, start_ms: u64, end_ms: u64) -> Result<()> {
        self.persist_with_retry("clear event range", || {
            self.store.delete_events_in_range(start_ms, end_ms)
        })
        .await?;
        self.events
            .retain(|e| e.timestamp_ms < start_ms || e.timestamp_ms >= end_ms);
        Ok(())
    }

    async fn clear_domains(&mut self, fqdns: Vec<String>) -> Result<()> {
        self.persist_with_retry("clear events by domain", || {
            self.store.delete_events_by_domains(&fqdns)
        })
        .await?;
        self.events.retain(|e| !fqdns.contains(&e.fqdn));
        Ok(())
    }

    /// History deletions get exactly one automatic retry of the same
    /// operation before the failure is handed back.
    async fn persist_with_retry<F, Fut>(&self, what: &str, op: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        match op().await {
            Ok(()) => Ok(()),
            Err(first) => {
                self.stats.inc_store_failures();
                self.stats.inc_store_retries();
                warn!("{} failed, retrying once: {:#}", what, first);
                match op().await {
                    Ok(()) => Ok(()),
                    Err(second) => {
                        self.stats.inc_store_failures();
                        Err(second.context(format!("{} failed after retry", what)))
                    }
                }
            }
        }
    }
}

/// Half-open `[start, end)` slice bounds over the timestamp-ordered
/// list: first index with `t >= start_ms`, first index with
/// `t >= end_ms`.
fn range_bounds(events: &[WebsiteEvent], start_ms: u64, end_ms: u64) -> (usize, usize) {
    let lo = events.partition_point(|e| e.timestamp_ms < start_ms);
    let hi = events.partition_point(|e| e.timestamp_ms < end_ms);
    (lo, hi.max(lo))
}
