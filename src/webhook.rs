use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::WebhookConfig;

/// Fire-and-forget webhook dispatcher for `notify` actions.
///
/// Dispatch happens on a spawned task with its own timeouts, so a slow
/// or failing webhook endpoint can never delay the visitor's redirect.
/// Failures are logged and counted, never surfaced to the visitor.
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn dispatch(
        self: &Arc<Self>,
        webhook_url: Option<String>,
        message: Option<String>,
        short_code: &str,
    ) {
        let Some(url) = webhook_url else {
            debug!(short_code, "notify action without webhook_url, nothing to dispatch");
            return;
        };

        let client = self.client.clone();
        let short_code = short_code.to_string();
        tokio::spawn(async move {
            let payload = json!({
                "event": "link_visited",
                "short_code": short_code,
                "message": message,
            });
            match client.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(%short_code, %url, "webhook delivered");
                    metrics::counter!("linkgate_webhooks_delivered").increment(1);
                }
                Ok(response) => {
                    warn!(%short_code, %url, status = %response.status(), "webhook rejected");
                    metrics::counter!("linkgate_webhooks_failed").increment(1);
                }
                Err(e) => {
                    warn!(%short_code, %url, error = %e, "webhook dispatch failed");
                    metrics::counter!("linkgate_webhooks_failed").increment(1);
                }
            }
        });
    }
}
