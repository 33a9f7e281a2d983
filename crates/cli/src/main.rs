use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ladder_core::config::AppConfig;
use ladder_core::ConfigLoader;
use ladder_exchange_gate::GateFuturesClient;
use ladder_manager::Orchestrator;
use ladder_store::PositionStore;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "ladder")]
#[command(about = "Multi-tier position lifecycle manager for Gate.io perpetual futures", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring loops until interrupted
    Run,
    /// Show system status and recent errors
    Status,
    /// Show one position (or all active positions) with its audit trail
    Position {
        /// Position id; omit to list all active positions
        #[arg(long)]
        id: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ConfigLoader::load_from(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config))?;

    match cli.command {
        Commands::Run => run(&config).await,
        Commands::Status => status(&config).await,
        Commands::Position { id } => position(&config, id).await,
    }
}

async fn build_orchestrator(config: &AppConfig) -> anyhow::Result<Arc<Orchestrator>> {
    let store = PositionStore::new(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("opening position store at {}", config.database.url))?;
    let client = GateFuturesClient::from_config(&config.exchange, &config.credentials)
        .context("building exchange client")?;
    Ok(Arc::new(Orchestrator::new(
        Arc::new(client),
        store,
        config.planner.clone(),
        config.manager.clone(),
    )))
}

async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config).await?;

    orchestrator.start().await.context("starting monitoring")?;
    tracing::info!("monitoring running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received");

    orchestrator.stop().await.context("stopping monitoring")?;
    Ok(())
}

async fn status(config: &AppConfig) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let status = orchestrator.system_status().await?;

    println!("monitoring active: {}", status.monitoring_active);
    println!("active positions:  {}", status.active_positions);
    println!("unprocessed fills: {}", status.unprocessed_fills);
    match status.last_check {
        Some(at) => println!("last check:        {at}"),
        None => println!("last check:        never"),
    }
    if status.recent_errors.is_empty() {
        println!("recent errors:     none");
    } else {
        println!("recent errors:");
        for entry in &status.recent_errors {
            println!(
                "  {} [{}] {}: {}",
                entry.at, entry.severity, entry.context, entry.message
            );
        }
    }
    Ok(())
}

async fn position(config: &AppConfig, id: Option<Uuid>) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config).await?;

    let details = match id {
        Some(id) => match orchestrator.position_details(id).await? {
            Some(details) => vec![details],
            None => {
                println!("position {id} not found");
                return Ok(());
            }
        },
        None => orchestrator.active_position_details().await?,
    };

    if details.is_empty() {
        println!("no active positions");
        return Ok(());
    }
    for d in &details {
        let p = &d.position;
        println!(
            "{} {} {} phase={} remaining={}/{} entry={} stop={} pnl={}",
            p.id,
            p.contract,
            p.direction,
            p.phase,
            p.remaining_size,
            p.total_size,
            p.entry_price,
            p.current_stop_price,
            p.realized_pnl
        );
        for audit in &d.audits {
            let outcome = if audit.success { "ok" } else { "FAILED" };
            println!(
                "    {} {} [{}] {}",
                audit.timestamp, audit.action, outcome, audit.details
            );
            if let Some(err) = &audit.error {
                println!("        error: {err}");
            }
        }
    }
    Ok(())
}
