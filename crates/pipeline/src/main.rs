//! ChannelForge Pipeline CLI
//!
//! pipeline run [consider] [pick]
//! pipeline resume <run-id>
//! pipeline cancel <run-id>

use anyhow::{bail, Context};
use channelforge_common::{
    config::AppConfig,
    db::{DbPool, PipelineStore, Repository, TriageFilters},
    llm::create_llm_client,
    metrics,
    youtube::YouTubeClient,
    VERSION,
};
use channelforge_pipeline::{PipelineService, ProgressEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const USAGE: &str = "usage: pipeline run [consider] [pick] | resume <run-id> | cancel <run-id>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    init_tracing(&config);
    info!("Starting ChannelForge Pipeline v{}", VERSION);

    metrics::register_metrics();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        bail!(USAGE);
    };

    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let store: Arc<dyn PipelineStore> = Arc::new(Repository::new(db));

    let llm = create_llm_client(&config.llm)?;
    let remote = YouTubeClient::from_config(&config.youtube)?;
    if remote.is_none() {
        warn!("No YouTube API key configured, resolving videos from cache only");
    }

    let service = PipelineService::from_config(&config, store, llm, remote);
    let progress = tokio::spawn(log_progress(service.subscribe()));

    match command {
        "run" => {
            let defaults = TriageFilters::default();
            let filters = TriageFilters {
                consider_count: parse_count(args.get(1), defaults.consider_count)?,
                pick_count: parse_count(args.get(2), defaults.pick_count)?,
                ..defaults
            };
            let run = service.run_to_completion(filters).await?;
            info!(run_id = %run.id, status = %run.status, channels = run.channel_count, "Run finished");
        }
        "resume" => {
            let run_id = parse_run_id(args.get(1))?;
            let run = service.resume_to_completion(run_id).await?;
            info!(run_id = %run.id, status = %run.status, "Resume finished");
        }
        "cancel" => {
            let run_id = parse_run_id(args.get(1))?;
            let outcome = service.cancel(run_id).await?;
            info!(
                run_id = %run_id,
                run_cancelled = outcome.run_cancelled,
                channels_cancelled = outcome.channels_cancelled,
                "Cancel finished"
            );
        }
        other => bail!("unknown command {:?}\n{}", other, USAGE),
    }

    progress.abort();
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

fn parse_count(arg: Option<&String>, default: usize) -> anyhow::Result<usize> {
    match arg {
        Some(value) => value
            .parse()
            .with_context(|| format!("expected a positive number, got {:?}", value)),
        None => Ok(default),
    }
}

fn parse_run_id(arg: Option<&String>) -> anyhow::Result<Uuid> {
    let value = arg.context(USAGE)?;
    Uuid::parse_str(value).with_context(|| format!("invalid run id {:?}", value))
}

async fn log_progress(mut rx: broadcast::Receiver<ProgressEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => info!(
                run_id = %event.run_id,
                step = %event.step,
                channel = ?event.entity_name,
                item = ?event.item_id,
                progress = event.progress,
                total = event.total,
                "{}",
                event.message
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Progress log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
