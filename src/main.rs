use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linkgate::config::Config;
use linkgate::context::ContextBuilder;
use linkgate::metrics::MetricsCollector;
use linkgate::server::RedirectServer;
use linkgate::store::MemoryLinkStore;
use linkgate::webhook::WebhookNotifier;

#[derive(Parser, Debug)]
#[command(name = "linkgate")]
#[command(about = "A short-link redirect gateway with a priority rule engine")]
struct Args {
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    #[arg(short, long)]
    validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting linkgate");

    let config = Config::load(&args.config).await?;

    if args.validate_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let metrics = MetricsCollector::new(&config.metrics)?;

    let public_base = config.server.public_base();
    let store = Arc::new(MemoryLinkStore::from_seeds(&config.links, &public_base));
    info!("Loaded {} links from config", config.links.len());

    let context_builder = Arc::new(ContextBuilder::new(&config.context)?);
    let notifier = Arc::new(WebhookNotifier::new(&config.webhook)?);

    let config = Arc::new(config);
    let server = RedirectServer::new(config.clone(), store, context_builder, notifier);

    let metrics_task = tokio::spawn(async move {
        if let Err(e) = metrics.start_server().await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::select! {
        result = server.start() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    metrics_task.abort();
    Ok(())
}
