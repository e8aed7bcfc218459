//! `nbagent`: discovers infrastructure from configured sources and
//! keeps a NetBox inventory in sync with what it finds.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nbagent_connector::Source;
use nbagent_netbox::NetBoxClient;
use nbagent_sync::{CycleReport, CycleRunner, MetricsStore};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AgentConfig;

#[derive(Parser)]
#[command(name = "nbagent", version, about = "NetBox discovery agent")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "/etc/nbagent/config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run synchronization cycles on the configured interval.
    Run,
    /// Run a single cycle and exit.
    Once,
    /// Run a single cycle without writing anything, and print the plan.
    Preview,
    /// Validate the configuration and test every connection.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::load(&cli.config)?;

    match cli.command {
        Command::Run => run_loop(config).await,
        Command::Once => {
            let dry_run = config.agent.dry_run;
            run_single(config, dry_run).await
        }
        Command::Preview => preview(config).await,
        Command::Check => check(config).await,
    }
}

fn build_runner(config: &AgentConfig) -> Result<CycleRunner> {
    let client = NetBoxClient::new(&config.netbox).context("cannot build netbox client")?;
    let sources: Vec<Arc<dyn Source>> = config
        .sources
        .iter()
        .filter(|s| s.enabled)
        .map(|s| {
            nbagent_sources::build_source(s.clone())
                .with_context(|| format!("cannot build source '{}'", s.name))
        })
        .collect::<Result<_>>()?;

    info!(sources = sources.len(), netbox = %config.netbox.url, "agent initialized");
    Ok(CycleRunner::new(
        sources,
        Arc::new(client),
        config.sync.clone(),
    ))
}

async fn run_single(config: AgentConfig, dry_run: bool) -> Result<()> {
    let runner = build_runner(&config)?;
    let report = runner.run(dry_run).await.context("cycle failed")?;
    print_report(&report);
    if report.stats.failures > 0 {
        anyhow::bail!("{} write(s) failed", report.stats.failures);
    }
    Ok(())
}

/// A dry run that prints the full report as JSON.
async fn preview(config: AgentConfig) -> Result<()> {
    let runner = build_runner(&config)?;
    let report = runner.run(true).await.context("cycle failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_loop(config: AgentConfig) -> Result<()> {
    let dry_run = config.agent.dry_run;
    let interval_secs = config.agent.interval_secs;
    let runner = build_runner(&config)?;
    let metrics = MetricsStore::new(100);

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_secs, dry_run, "entering scheduler loop");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match runner.run(dry_run).await {
                    Ok(report) => {
                        metrics.record(report.stats.clone());
                        let totals = metrics.totals();
                        info!(
                            summary = %report.summary_line(),
                            cycles = metrics.len(),
                            total_created = totals.created,
                            total_updated = totals.updated,
                            total_failures = totals.failures,
                            "cycle complete"
                        );
                    }
                    // Aborted cycles (snapshot or planning failure) are
                    // retried on the next tick.
                    Err(err) => error!(error = %err, "cycle aborted"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                return Ok(());
            }
        }
    }
}

async fn check(config: AgentConfig) -> Result<()> {
    let client = NetBoxClient::new(&config.netbox)?;
    match client.test_connection().await {
        Ok(version) => info!(netbox = %config.netbox.url, version, "netbox reachable"),
        Err(err) => {
            error!(netbox = %config.netbox.url, error = %err, "netbox unreachable");
            anyhow::bail!("netbox connection check failed");
        }
    }

    let mut failures = 0usize;
    for settings in config.sources.iter().filter(|s| s.enabled) {
        let name = settings.name.clone();
        match nbagent_sources::build_source(settings.clone()) {
            Ok(source) => match source.test_connection().await {
                Ok(()) => info!(source = %name, kind = source.kind(), "source ok"),
                Err(err) => {
                    warn!(source = %name, error = %err, code = err.error_code(), "source check failed");
                    failures += 1;
                }
            },
            Err(err) => {
                warn!(source = %name, error = %err, "source configuration invalid");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} source check(s) failed");
    }
    info!("all checks passed");
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!("{}", report.summary_line());
    for source in &report.sources {
        match &source.error {
            None => println!(
                "  source {} ({}): {} records in {}ms",
                source.name, source.kind, source.records, source.duration_ms
            ),
            Some(error) => println!("  source {} ({}): FAILED: {error}", source.name, source.kind),
        }
    }
    for action in &report.actions {
        if action.reason.is_empty() {
            println!("  {} {}: {}", action.action, action.name, action.outcome);
        } else {
            println!(
                "  {} {}: {} ({})",
                action.action, action.name, action.outcome, action.reason
            );
        }
    }
}
