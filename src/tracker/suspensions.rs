use crate::notifier::NotificationSuspender;
use crate::stats::StatsCollector;
use crate::store::UsageStore;
use anyhow::{anyhow, Result};
use arc_swap::ArcSwap;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Handle to the suspension worker.
///
/// Mutations queue behind the initial load and each other. Reads come
/// in two flavors: `get_all_suspended` goes through the queue,
/// `is_suspended` reads a lock-free snapshot published by the worker
/// so the page hot path never waits.
#[derive(Clone)]
pub struct SuspensionTracker {
    tx: mpsc::Sender<SuspensionCommand>,
    snapshot: Arc<ArcSwap<FxHashSet<String>>>,
}

enum SuspensionCommand {
    Set {
        fqdns: Vec<String>,
        suspended: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    GetAll {
        reply: oneshot::Sender<Vec<String>>,
    },
}

impl SuspensionTracker {
    pub fn spawn(
        store: Arc<dyn UsageStore>,
        notifier: Arc<dyn NotificationSuspender>,
        stats: Arc<StatsCollector>,
        queue_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let snapshot = Arc::new(ArcSwap::from_pointee(FxHashSet::default()));
        tokio::spawn(run_suspension_worker(
            store,
            notifier,
            stats,
            snapshot.clone(),
            rx,
        ));
        Self { tx, snapshot }
    }

    /// Suspends (or unsuspends) the given sites. The whole new set is
    /// persisted; memory, snapshot and the notifier only move once the
    /// store confirms.
    pub async fn set_suspended(&self, fqdns: Vec<String>, suspended: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SuspensionCommand::Set {
                fqdns,
                suspended,
                reply,
            })
            .await
            .map_err(|_| worker_stopped())?;
        rx.await.map_err(|_| worker_stopped())?
    }

    pub async fn get_all_suspended(&self) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SuspensionCommand::GetAll { reply })
            .await
            .map_err(|_| worker_stopped())?;
        rx.await.map_err(|_| worker_stopped())
    }

    /// Non-blocking by design: answers `false` until the initial load
    /// has published a snapshot. The sole hot-path caller needs an
    /// immediate answer, not a delayed one.
    pub fn is_suspended(&self, fqdn: &str) -> bool {
        self.snapshot.load().contains(fqdn)
    }
}

fn worker_stopped() -> anyhow::Error {
    anyhow!("suspension tracker worker stopped")
}

async fn run_suspension_worker(
    store: Arc<dyn UsageStore>,
    notifier: Arc<dyn NotificationSuspender>,
    stats: Arc<StatsCollector>,
    snapshot: Arc<ArcSwap<FxHashSet<String>>>,
    mut rx: mpsc::Receiver<SuspensionCommand>,
) {
    let loaded: Vec<String> =
        super::load_or_default("suspension set", || store.get_all_suspensions()).await;
    let mut suspended: FxHashSet<String> = loaded.into_iter().collect();
    snapshot.store(Arc::new(suspended.clone()));

    while let Some(cmd) = rx.recv().await {
        match cmd {
            SuspensionCommand::Set {
                fqdns,
                suspended: on,
                reply,
            } => {
                let result = apply_set(
                    &*store,
                    &*notifier,
                    &stats,
                    &snapshot,
                    &mut suspended,
                    fqdns,
                    on,
                )
                .await;
                let _ = reply.send(result);
            }
            SuspensionCommand::GetAll { reply } => {
                let mut all: Vec<String> = suspended.iter().cloned().collect();
                all.sort();
                let _ = reply.send(all);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn apply_set(
    store: &dyn UsageStore,
    notifier: &dyn NotificationSuspender,
    stats: &StatsCollector,
    snapshot: &ArcSwap<FxHashSet<String>>,
    suspended: &mut FxHashSet<String>,
    fqdns: Vec<String>,
    on: bool,
) -> Result<()> {
    let mut next = suspended.clone();
    if on {
        for fqdn in &fqdns {
            next.insert(fqdn.clone());
        }
    } else {
        for fqdn in &fqdns {
            next.remove(fqdn);
        }
    }

    let mut full: Vec<String> = next.iter().cloned().collect();
    full.sort();

    if let Err(e) = store.set_suspensions(&full).await {
        stats.inc_store_failures();
        return Err(e.context("suspension set not persisted"));
    }

    *suspended = next;
    snapshot.store(Arc::new(suspended.clone()));
    stats.inc_suspension_changes();
    // One-way, fire-and-forget from here on.
    notifier.suspensions_changed(&fqdns, on);
    Ok(())
}
