use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use qlue_adapters::{FeedSource, FixtureFeedSource};
use qlue_storage::{MemoryReportStore, ReportStore};
use qlue_sync::{
    http_feed_from_config, pg_store_from_config, IngestConfig, IngestPipeline, IngestScheduler,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "qlue-cli")]
#[command(about = "Qlue report feed ingestion")]
struct Cli {
    /// YAML config file; environment variables are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep reports in memory instead of writing to Postgres.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Read feed pages from page_<n>.json files instead of the live service.
    #[arg(long, global = true)]
    fixtures: Option<PathBuf>,

    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll on the configured interval until interrupted.
    Run,
    /// Run a single poll cycle and print its summary.
    PollOnce,
    /// Print the highest stored report id.
    Watermark,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("qlue=info,warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn load_config(cli: &Cli) -> Result<IngestConfig> {
    let mut config = match &cli.config {
        Some(path) => IngestConfig::from_yaml_path(path)?,
        None => IngestConfig::from_env(),
    };
    if let Some(dir) = &cli.fixtures {
        if config.service_url.trim().is_empty() {
            config.service_url = dir.display().to_string();
        }
    }
    config.validate()?;
    Ok(config)
}

fn build_store(cli: &Cli, config: &IngestConfig) -> Result<Arc<dyn ReportStore>> {
    if cli.dry_run {
        info!("dry run; reports are kept in memory");
        return Ok(Arc::new(MemoryReportStore::new()));
    }
    Ok(Arc::new(pg_store_from_config(config)?))
}

fn build_pipeline(cli: &Cli, config: IngestConfig) -> Result<IngestPipeline> {
    let feed: Box<dyn FeedSource> = match &cli.fixtures {
        Some(dir) => Box::new(FixtureFeedSource::from_dir(dir.clone())),
        None => Box::new(http_feed_from_config(&config)?),
    };
    let store = build_store(cli, &config)?;
    Ok(IngestPipeline::new(config, feed, store))
}

#[cfg(unix)]
async fn wait_for_shutdown(scheduler: &IngestScheduler) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut enable_cache = signal(SignalKind::user_defined1()).context("installing SIGUSR1")?;
    let mut disable_cache = signal(SignalKind::user_defined2()).context("installing SIGUSR2")?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for ctrl-c")?;
                return Ok(());
            }
            _ = enable_cache.recv() => scheduler.enable_cache_mode(),
            _ = disable_cache.recv() => {
                // Replay runs off the signal loop so Ctrl-C stays responsive.
                let pipeline = scheduler.pipeline().clone();
                tokio::spawn(async move {
                    let replayed = pipeline.disable_cache_mode().await;
                    info!(replayed, "cache mode disabled by signal");
                });
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_scheduler: &IngestScheduler) -> Result<()> {
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => {
            let config = load_config(&cli)?;
            let pipeline = Arc::new(build_pipeline(&cli, config)?);
            let mut scheduler = IngestScheduler::new(pipeline);
            scheduler.start().await?;
            wait_for_shutdown(&scheduler).await?;
            info!("shutting down");
            scheduler.shutdown().await?;
        }
        Commands::PollOnce => {
            let config = load_config(&cli)?;
            let pipeline = build_pipeline(&cli, config)?;
            pipeline.initialize_watermark().await;
            let summary = pipeline.poll().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Watermark => {
            let config = match &cli.config {
                Some(path) => IngestConfig::from_yaml_path(path)?,
                None => IngestConfig::from_env(),
            };
            let store = build_store(&cli, &config)?;
            match store.max_report_id().await? {
                Some(id) => println!("last report id: {id}"),
                None => println!("no stored reports"),
            }
        }
    }

    Ok(())
}
