use crate::stats::StatsCollector;
use crate::tracker::types::WebsiteEvent;
use crate::tracker::{EventTracker, SuspensionTracker};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Visibility transitions fed in by the embedding browser shell (or by
/// the control API, which makes the binary drivable end-to-end).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PageSignal {
    Shown { tab_id: u64, fqdn: String },
    Hidden { tab_id: u64 },
    Navigated { tab_id: u64, fqdn: String },
}

/// Translates page signals into START/STOP events per tab.
///
/// Owns the receiving end of the signal channel; when every sender is
/// dropped the observer stops. No other component holds a reference to
/// it.
pub struct PageViewObserver {
    events: EventTracker,
    suspensions: SuspensionTracker,
    stats: Arc<StatsCollector>,
    /// tab id -> currently visible fqdn
    active: FxHashMap<u64, String>,
}

impl PageViewObserver {
    pub fn new(
        events: EventTracker,
        suspensions: SuspensionTracker,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            events,
            suspensions,
            stats,
            active: FxHashMap::default(),
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<PageSignal>) {
        while let Some(signal) = rx.recv().await {
            self.handle_signal(signal).await;
        }
        info!("Page signal source closed, observer stopping.");
    }

    pub async fn handle_signal(&mut self, signal: PageSignal) {
        self.stats.inc_page_signals();
        match signal {
            PageSignal::Shown { tab_id, fqdn } | PageSignal::Navigated { tab_id, fqdn } => {
                self.switch_to(tab_id, fqdn).await;
            }
            PageSignal::Hidden { tab_id } => {
                if let Some(prev) = self.active.remove(&tab_id) {
                    self.record(WebsiteEvent::stop(now_ms(), prev)).await;
                }
            }
        }
    }

    async fn switch_to(&mut self, tab_id: u64, fqdn: String) {
        // Same-site navigation: the visit continues, nothing to record.
        if self.active.get(&tab_id) == Some(&fqdn) {
            return;
        }

        let now = now_ms();
        if let Some(prev) = self.active.insert(tab_id, fqdn.clone()) {
            self.record(WebsiteEvent::stop(now, prev)).await;
        }

        if self.suspensions.is_suspended(&fqdn) {
            // The placeholder UI belongs to the embedding shell; here we
            // only count and log the hit.
            self.stats.inc_suspended_hits();
            info!("Visit to suspended site {}", fqdn);
        }

        self.record(WebsiteEvent::start(now, fqdn)).await;
    }

    /// Terminal surface: tracker failures are logged and absorbed.
    async fn record(&self, event: WebsiteEvent) {
        if let Err(e) = self.events.add_event(event).await {
            warn!("Dropping page view event: {:#}", e);
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
