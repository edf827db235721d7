use super::NotificationSuspender;
use tracing::info;

/// Default adapter: records the change in the service log and nothing
/// else. Useful standalone and as the fallback when no webhook is
/// configured.
pub struct LogNotifier;

impl NotificationSuspender for LogNotifier {
    fn suspensions_changed(&self, fqdns: &[String], suspended: bool) {
        info!(
            target: "notifications",
            action = if suspended { "suppress" } else { "restore" },
            domains = ?fqdns,
            "notification state change"
        );
    }
}
