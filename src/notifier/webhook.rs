use super::NotificationSuspender;
use reqwest::Client;
use serde_json::json;
use tracing::error;

/// Posts suspension changes to an external endpoint. Fire-and-forget:
/// the request runs on its own task and failures are only logged.
pub struct WebhookNotifier {
    client: Client,
    url: url::Url,
}

impl WebhookNotifier {
    pub fn new(url: url::Url) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }
}

impl NotificationSuspender for WebhookNotifier {
    fn suspensions_changed(&self, fqdns: &[String], suspended: bool) {
        let payload = json!({
            "action": if suspended { "suppress" } else { "restore" },
            "domains": fqdns,
        });

        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            if let Err(e) = client.post(url.clone()).json(&payload).send().await {
                error!("Failed to deliver suspension webhook to {}: {}", url, e);
            }
        });
    }
}
