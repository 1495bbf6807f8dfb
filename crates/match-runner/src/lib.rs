//! Command-line runner for the matchmaking engine.
//!
//! Loads an entity snapshot, wires the engine from config, fires one
//! scheduler trigger and prints the batch report as JSON on stdout.
//! Progress goes to stderr through `tracing`.

pub mod cli;
pub mod config;
pub mod loader;
pub mod sink;
pub mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use matchmaking::{
    EngineConfig, EscalationLog, EscalationSink, EventBus, HttpModelClient,
    InMemoryEntitySource, ModelClient, Scheduler, SchedulerRun,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cli::{Cli, Command};
use loader::EntitySnapshot;
use sink::JsonlEscalationSink;
use telemetry::{append_run_log, RunLogReader, RunRecord};

/// Execute one command. Output is written to stdout as pretty JSON.
pub async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let config = config::load_engine_config(cli.config.as_deref())?;

    match &cli.command {
        Command::Check => {
            let url = &config.model.endpoint.base_url;
            let up = config::check_endpoint(url).await;
            print_json(&json!({ "endpoint": url, "reachable": up }))?;
            if !up {
                anyhow::bail!("model endpoint {url} is not reachable");
            }
            return Ok(());
        }
        Command::Stats => return stats(&cli, &config),
        _ => {}
    }

    let client: Arc<dyn ModelClient> = Arc::new(
        HttpModelClient::new(config.model.endpoint.clone())
            .context("Failed to build model client")?,
    );
    let output = execute(&cli, &config, client, cancel).await?;
    print_json(&output)
}

/// Run a trigger command against an explicit model client.
///
/// Returns the JSON document the CLI prints: the plan and report for a
/// single trigger, or the tick count for `watch`.
pub async fn execute(
    cli: &Cli,
    config: &EngineConfig,
    client: Arc<dyn ModelClient>,
    cancel: CancellationToken,
) -> Result<serde_json::Value> {
    let source = match &cli.entities {
        Some(path) => EntitySnapshot::load(path)?.into_source(),
        None => {
            warn!("No --entities given; matching an empty universe");
            InMemoryEntitySource::new()
        }
    };
    let escalations: Arc<dyn EscalationSink> = match &cli.escalations {
        Some(path) => Arc::new(JsonlEscalationSink::new(path)),
        None => Arc::new(EscalationLog::new()),
    };

    let bus = EventBus::new();
    let progress = telemetry::spawn_progress_logger(&bus);
    let scheduler = config.build_scheduler(client, Arc::new(source), escalations, Some(bus))?;

    let output = match &cli.command {
        Command::Watch => {
            let ticks = scheduler.run_periodic(&cancel).await?;
            info!(ticks, "Watch stopped");
            json!({ "ticks": ticks })
        }
        command => {
            let run = trigger(&scheduler, command, &cancel).await?;
            info!(summary = %run.report.summary(), "Run finished");
            if let Some(path) = &cli.run_log {
                append_run_log(&RunRecord::from_run(&run), path);
            }
            serde_json::to_value(&run)?
        }
    };

    // The scheduler owns the last bus sender.
    drop(scheduler);
    let _ = progress.await;
    Ok(output)
}

async fn trigger(
    scheduler: &Scheduler,
    command: &Command,
    cancel: &CancellationToken,
) -> Result<SchedulerRun> {
    let run = match command {
        Command::Full => scheduler.trigger_full(cancel).await?,
        Command::Incremental { since } => scheduler.trigger_incremental(*since, cancel).await?,
        Command::Entity { kind, id } => scheduler.trigger_entity(*kind, id, cancel).await?,
        other => anyhow::bail!("{other:?} is not a scheduler trigger"),
    };
    Ok(run)
}

fn stats(cli: &Cli, config: &EngineConfig) -> Result<()> {
    let cache = config.cache.open().context("Failed to open cache")?;
    let cache_stats = cache.stats()?;
    let runs = match &cli.run_log {
        Some(path) if path.exists() => Some(
            RunLogReader::read_from_file(path)
                .with_context(|| format!("Failed to read run log {}", path.display()))?
                .totals(),
        ),
        _ => None,
    };
    print_json(&json!({
        "backend": cache.backend_name(),
        "versions": cache.current_versions(),
        "cache": cache_stats,
        "runs": runs,
    }))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
