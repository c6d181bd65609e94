use anyhow::Result;
use axum::{routing::get, Router};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::MetricsConfig;

/// Prometheus metrics exporter for the gateway.
pub struct MetricsCollector {
    config: MetricsConfig,
    prometheus_handle: Option<PrometheusHandle>,
}

impl MetricsCollector {
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        let prometheus_handle = if config.enabled {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

            Self::register_metrics();
            Some(handle)
        } else {
            None
        };

        Ok(Self {
            config: config.clone(),
            prometheus_handle,
        })
    }

    fn register_metrics() {
        describe_counter!("linkgate_visits_total", "Total short-link visits handled");
        describe_counter!("linkgate_rules_matched", "Rules whose conditions matched a visit");
        describe_counter!("linkgate_rules_else_taken", "Else branches taken for non-matching rules");
        describe_counter!("linkgate_rules_skipped", "Rules skipped because a condition was malformed");
        describe_counter!("linkgate_action_fallbacks", "Invalid action settings degraded to the default redirect");
        describe_counter!("linkgate_default_redirects", "Visits resolved by the default long-URL redirect");
        describe_counter!("linkgate_dispositions", "Final dispositions by kind");
        describe_counter!("linkgate_password_attempts", "Password gate verification attempts");
        describe_counter!("linkgate_webhooks_delivered", "Webhook notifications delivered");
        describe_counter!("linkgate_webhooks_failed", "Webhook notifications that failed");
    }

    /// Serve the Prometheus scrape endpoint on its own port.
    pub async fn start_server(&self) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let handle = match &self.prometheus_handle {
            Some(handle) => handle.clone(),
            None => return Ok(()),
        };

        let path = self.config.path.clone();
        let app = Router::new().route(
            path.as_str(),
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );

        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Metrics server listening on {}{}", addr, path);
        axum::serve(listener, app).await?;
        Ok(())
    }
}
