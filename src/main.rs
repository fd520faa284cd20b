use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stagewatch::config::{LogFormat, LoggingConfig, StagewatchConfig, TimelineConfig};
use stagewatch::controller::{StatusSnapshot, TriggerError};
use stagewatch::events::PipelineEvent;
use stagewatch::history::{self, HistoryEntry};
use stagewatch::location::{self, DEFAULT_LOCATION};
use stagewatch::pipeline::StageName;

#[derive(Parser)]
#[command(
    name = "stagewatch",
    about = "Live status and audit history for a remote four-stage data pipeline",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $STAGEWATCH_CONFIG, then ./stagewatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + trigger controller)
    Serve {
        /// Bind address, overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Trigger one run and follow it to completion
    Trigger {
        /// Location as "City,cc"
        #[arg(long, default_value = DEFAULT_LOCATION)]
        location: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,

        /// Answer the trigger in-process instead of calling the webhook
        #[arg(long)]
        offline: bool,
    },

    /// Show the persisted run history, most recent first
    History {
        #[arg(long)]
        json: bool,
    },

    /// Show success/failure counts over the history
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Show the audit log derived from the history
    Audit {
        #[arg(long)]
        json: bool,
    },

    /// List preset locations
    Locations,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = StagewatchConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting stagewatch daemon");
            stagewatch::serve(&config).await?;
        }
        Commands::Trigger {
            location,
            json,
            offline,
        } => {
            if offline {
                config.timeline = TimelineConfig::immediate(config.timeline.overlap);
            }
            run_trigger(&config, &location, json, offline).await?;
        }
        Commands::History { json } => {
            let ledger = stagewatch::load_history(&config)?;
            let entries = ledger.to_vec();
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No runs recorded yet.");
            } else {
                print_history(&entries);
            }
        }
        Commands::Stats { json } => {
            let stats = history::statistics(&stagewatch::load_history(&config)?);
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Total:      {}", stats.total);
                println!("Successful: {}", stats.successful);
                println!("Failed:     {}", stats.failed);
                println!("Success:    {:.1}%", stats.success_rate() * 100.0);
            }
        }
        Commands::Audit { json } => {
            let rows = history::audit_rows(&stagewatch::load_history(&config)?);
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("Audit log is empty.");
            } else {
                println!(
                    "{:<5} | {:<36} | {:<28} | {:<9} | {:<7} | {:<20} | Location",
                    "Id", "Execution", "Version", "Stage", "Status", "Timestamp"
                );
                println!(
                    "{:-<5}-|-{:-<36}-|-{:-<28}-|-{:-<9}-|-{:-<7}-|-{:-<20}-|-{:-<12}",
                    "", "", "", "", "", "", ""
                );
                for row in rows {
                    println!(
                        "{:<5} | {:<36} | {:<28} | {:<9} | {:<7} | {:<20} | {}",
                        row.id,
                        row.execution_id,
                        row.version,
                        row.stage,
                        row.status,
                        row.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        row.location
                    );
                }
            }
        }
        Commands::Locations => {
            for preset in location::presets() {
                println!("{:<14} {}", preset.value, preset.label);
            }
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn run_trigger(
    config: &StagewatchConfig,
    location: &str,
    json: bool,
    offline: bool,
) -> Result<()> {
    let controller = stagewatch::build_controller(config, offline)?;

    let progress = (!json).then(|| {
        let mut rx = controller.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                match event {
                    PipelineEvent::StageChanged { stage, status, .. } => {
                        println!("  {:<10} -> {}", stage, status);
                    }
                    PipelineEvent::WarningsRaised { warnings, .. } => {
                        for warning in warnings {
                            println!("  warning: {}", warning);
                        }
                    }
                    PipelineEvent::RunFinished { .. } => break,
                    _ => {}
                }
            }
        })
    });

    let outcome = controller.run_to_completion(location).await;
    if let Some(progress) = progress {
        // The printer stops at RunFinished, which only exists for recorded runs.
        if matches!(outcome, Ok(_) | Err(TriggerError::ExecutorUnreachable(_))) {
            let _ = progress.await;
        } else {
            progress.abort();
        }
    }
    let snapshot = controller.snapshot().await;

    match outcome {
        Ok(entry) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "entry": entry,
                        "status": snapshot,
                    }))?
                );
            } else {
                print_summary(&snapshot, &entry);
            }
            Ok(())
        }
        Err(TriggerError::ExecutorUnreachable(message)) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "entry": controller.history().await.first(),
                        "status": snapshot,
                    }))?
                );
            } else {
                print_stages(&snapshot);
            }
            anyhow::bail!("pipeline trigger failed: {message}")
        }
        Err(e) => Err(e.into()),
    }
}

fn print_stages(snapshot: &StatusSnapshot) {
    println!("\n{:<10} | Status", "Stage");
    println!("{:-<10}-|-{:-<8}", "", "");
    for stage in StageName::ALL {
        let status = snapshot.stages.get(&stage).copied().unwrap_or_default();
        println!("{:<10} | {}", stage, status);
    }
}

fn print_summary(snapshot: &StatusSnapshot, entry: &HistoryEntry) {
    print_stages(snapshot);
    println!("\n=== stagewatch run summary ===");
    println!("Location:     {},{}", entry.location, entry.country);
    println!("Outcome:      {}", entry.status);
    println!("Execution id: {}", entry.execution_id);
    println!("Version:      {}", entry.version);
    println!(
        "Retries:      weather {}, bitcoin {}",
        snapshot.retries.weather, snapshot.retries.bitcoin
    );
    if snapshot.validation_warnings.is_empty() {
        println!("Warnings:     none");
    } else {
        println!("Warnings:");
        for warning in &snapshot.validation_warnings {
            println!(" - {}", warning);
        }
    }
    println!("==============================\n");
}

fn print_history(entries: &[HistoryEntry]) {
    println!(
        "{:<5} | {:<20} | {:<16} | {:<7} | {:<36} | Retries",
        "Id", "Finished", "Location", "Status", "Execution"
    );
    println!(
        "{:-<5}-|-{:-<20}-|-{:-<16}-|-{:-<7}-|-{:-<36}-|-{:-<7}",
        "", "", "", "", "", ""
    );
    for entry in entries {
        println!(
            "{:<5} | {:<20} | {:<16} | {:<7} | {:<36} | {}",
            entry.id,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format!("{},{}", entry.location, entry.country),
            entry.status,
            entry.execution_id,
            entry.total_retries()
        );
    }
}
