pub mod log;
pub mod webhook;

pub use self::log::LogNotifier;
pub use self::webhook::WebhookNotifier;

use crate::config::Config;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Collaborator told to suppress or restore platform notifications for
/// a set of sites after the suspension set changes. One-way: the
/// trackers never wait on it and never hear back.
pub trait NotificationSuspender: Send + Sync {
    fn suspensions_changed(&self, fqdns: &[String], suspended: bool);
}

pub fn create_notifier(config: &Config) -> Result<Arc<dyn NotificationSuspender>> {
    match config.notifier.kind.as_str() {
        "webhook" => {
            let raw = config
                .notifier
                .webhook_url
                .as_deref()
                .context("notifier.kind is \"webhook\" but notifier.webhook_url is unset")?;
            let url = url::Url::parse(raw).context("Failed to parse notifier.webhook_url")?;
            Ok(Arc::new(WebhookNotifier::new(url)) as Arc<dyn NotificationSuspender>)
        }
        "log" => Ok(Arc::new(LogNotifier) as Arc<dyn NotificationSuspender>),
        other => {
            info!("Unknown notifier kind '{}', defaulting to log", other);
            Ok(Arc::new(LogNotifier) as Arc<dyn NotificationSuspender>)
        }
    }
}
