//! # driftwatch
//!
//! Binary entry point: wires settings, telemetry, storage and the poll
//! engine together, then serves HTTP or runs a one-shot command.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use driftwatch_core::ids::EventId;
use driftwatch_engine::{
    Dispatcher, DispatcherConfig, OrchestratorConfig, PollOrchestrator, Services,
};
use driftwatch_server::{DriftwatchServer, ServerConfig};
use driftwatch_settings::loader::resolve_path;
use driftwatch_settings::{load_settings, load_settings_from_path, ApiKeys, DriftwatchSettings};
use driftwatch_store::Database;
use driftwatch_telemetry::{init_telemetry, LogQuery, SqliteLogSink, TelemetryConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "driftwatch", about = "Watch how model answers about live events drift")]
struct Cli {
    /// Settings file (defaults to `~/.driftwatch/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve HTTP and run the scheduler loop until ctrl-c.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one scheduling pass, wait for the dispatched cycles, print counts.
    Tick,
    /// Poll one event now and print the report as JSON.
    Poll { event_id: String },
    /// Print persisted warn+ logs, newest first.
    Logs {
        #[arg(long)]
        event_id: Option<String>,
        #[arg(long)]
        level: Option<String>,
        #[arg(long, default_value = "50")]
        limit: u32,
    },
}

fn telemetry_config(settings: &DriftwatchSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: TelemetryConfig::parse_level(&settings.logging.level),
        log_to_sqlite: settings.logging.log_to_sqlite,
        log_db_path: resolve_path(&settings.logging.log_db_path),
        ..TelemetryConfig::default()
    }
}

fn build_dispatcher(
    settings: &DriftwatchSettings,
    db: &Database,
    keys: &ApiKeys,
) -> Result<Arc<Dispatcher>> {
    let services = Services::from_settings(settings, keys).context("Failed to configure services")?;
    let orchestrator = Arc::new(PollOrchestrator::new(
        db.clone(),
        Arc::new(services),
        OrchestratorConfig::from_settings(settings),
    ));
    Ok(Arc::new(Dispatcher::new(
        db.clone(),
        orchestrator,
        DispatcherConfig::from_settings(settings),
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("Failed to load settings")?;

    if let Command::Logs { event_id, level, limit } = &cli.command {
        let sink = SqliteLogSink::new(&resolve_path(&settings.logging.log_db_path))
            .context("Failed to open log database")?;
        let records = sink
            .query(&LogQuery {
                event_id: event_id.clone(),
                level: level.clone(),
                limit: Some(*limit),
                ..LogQuery::default()
            })
            .context("Failed to query logs")?;
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let _telemetry = init_telemetry(telemetry_config(&settings));

    let db_path = resolve_path(&settings.database.path);
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    let keys = ApiKeys::from_env();
    let dispatcher = build_dispatcher(&settings, &db, &keys)?;

    match cli.command {
        Command::Serve { host, port } => {
            let mut config = ServerConfig::from_settings(&settings);
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            let server =
                DriftwatchServer::new(config, db, dispatcher.clone(), keys.cron_secret.clone());
            let (addr, handle) = server.listen().await.context("Failed to bind server")?;
            info!("driftwatch listening on http://{addr}");

            let interval = Duration::from_secs(settings.polling.tick_interval_secs);
            let scheduler = {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { dispatcher.run_loop(interval).await })
            };

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for ctrl-c")?;

            info!("Shutting down...");
            server.shutdown();
            dispatcher.shutdown().await;
            let _ = scheduler.await;
            let _ = handle.await;
            info!("Shutdown complete");
        }
        Command::Tick => {
            let report = dispatcher.tick(Utc::now())?;
            dispatcher.drain().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Poll { event_id } => {
            let report = dispatcher.poll_inline(&EventId::from_raw(event_id)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Logs { .. } => {}
    }
    Ok(())
}
