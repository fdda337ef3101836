use anyhow::Context;
use clap::Parser;
use newsdesk::{
    config::{Config, ObservabilityConfig},
    loader::{init_loader_metrics, ReaderRegistry},
    search::init_search_metrics,
    state::create_store,
    Pipeline,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "newsdesk")]
#[command(about = "News aggregation: fetch, index and group news", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "NEWSDESK_CONFIG")]
    config: Option<PathBuf>,

    /// Rebuild the news index from the store after startup
    #[arg(long)]
    reindex: bool,
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("newsdesk={}", config.log_level).into());

    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    init_tracing(&config.observability);
    tracing::info!(
        service = %config.observability.service_name,
        "Starting newsdesk v{}",
        env!("CARGO_PKG_VERSION")
    );

    if config.observability.prometheus_enabled {
        init_search_metrics();
        init_loader_metrics();
        tracing::info!("Prometheus metrics initialized");
    }

    // Initialize storage backend
    tracing::info!(backend = ?config.state.backend, "Opening store");
    let stores = create_store(&config.state)?;

    for source in &config.sources {
        stores.sources.add_source(source.clone()).await?;
    }
    tracing::info!(count = config.sources.len(), "Registered configured sources");

    let readers = ReaderRegistry::with_defaults(&config.loader)?;
    let grouping_enabled = config.grouping.enabled;
    let reindex = cli.reindex;

    let pipeline = Pipeline::start(config, stores.news.clone(), stores.sources.clone(), readers)
        .await
        .context("Failed to start pipeline")?;
    tracing::info!(grouping = grouping_enabled, "Pipeline started");

    if reindex {
        let task = pipeline.reindex_news()?;
        tokio::spawn(async move {
            match task.await {
                Ok(Ok(summary)) => tracing::info!(
                    batches = summary.batches,
                    records = summary.records,
                    "News reindex finished"
                ),
                Ok(Err(e)) => tracing::error!(error = %e, "News reindex failed"),
                Err(e) => tracing::error!(error = %e, "News reindex task did not complete"),
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    pipeline.shutdown()?;
    Ok(())
}
