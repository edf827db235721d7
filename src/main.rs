use anyhow::Result;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use usage_watch::config::Config;
use usage_watch::init::{init_store, setup_logging};
use usage_watch::notifier::create_notifier;
use usage_watch::observer::{now_ms, PageSignal, PageViewObserver};
use usage_watch::stats::StatsCollector;
use usage_watch::tracker::{EventTracker, SuspensionTracker, TokenTracker};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load Config
    let config_path = std::env::args().nth(1).unwrap_or("config.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path).await?
    } else {
        Config::default()
    };

    // 2. Setup Logging
    setup_logging(&config);
    info!("Starting usage-watch...");

    if !std::path::Path::new(&config_path).exists() {
        info!("Config file not found, using defaults.");
    }

    // 3. Init Stats
    let stats = if config.stats.enable {
        StatsCollector::new(config.stats.log_interval_seconds)
    } else {
        StatsCollector::detached()
    };

    // 4. Init Store
    let store = init_store(&config);

    // 5. Init Notification Suspender
    let notifier = create_notifier(&config)?;

    // 6. Spawn Trackers
    let capacity = config.tracking.queue_capacity;
    let events = EventTracker::spawn(store.clone(), stats.clone(), capacity);
    let suspensions =
        SuspensionTracker::spawn(store.clone(), notifier, stats.clone(), capacity);
    let tokens = TokenTracker::spawn(store.clone(), stats.clone(), capacity);

    // 7. Spawn Page View Observer
    let (signal_tx, signal_rx) = tokio::sync::mpsc::channel::<PageSignal>(capacity);
    let observer = PageViewObserver::new(events.clone(), suspensions.clone(), stats.clone());
    tokio::spawn(observer.run(signal_rx));

    // 8. Spawn Retention Pruner
    let retention_ms = config.tracking.retention_hours * 3600 * 1000;
    let prune_interval = Duration::from_secs(config.tracking.prune_interval_seconds);
    let events_for_pruner = events.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(prune_interval);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let cutoff = now_ms().saturating_sub(retention_ms);
            if let Err(e) = events_for_pruner.clear_range(0, cutoff).await {
                warn!("Retention prune failed: {:#}", e);
            }
        }
    });

    // 9. Start API Server
    if config.api.enable {
        let api_events = events.clone();
        let api_suspensions = suspensions.clone();
        let api_tokens = tokens.clone();
        let api_stats = stats.clone();
        let api_signal_tx = signal_tx.clone();
        let host = config.api.host.clone();
        let port = config.api.port;

        tokio::spawn(async move {
            usage_watch::api::start_api_server(
                api_events,
                api_suspensions,
                api_tokens,
                api_stats,
                api_signal_tx,
                host,
                port,
            )
            .await;
        });
    }

    // 10. Graceful Shutdown
    signal::ctrl_c().await?;
    info!("Shutdown signal received.");

    Ok(())
}
