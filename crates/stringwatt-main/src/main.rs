// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of StringWatt.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use stringwatt_core::{Scheduler, SqliteStore};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "stringwatt")]
#[command(about = "Hourly per-string power rollups for solar inverter telemetry", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "stringwatt.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the rollup pipeline once immediately, then exit
    RunNow,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config.to_string_lossy())?;

    info!("⚡ Starting StringWatt rollup pipeline");
    info!("   Database: {}", config.database.path);
    info!("   Daily run at: {} UTC", config.schedule.run_at);
    info!(
        "   Window: {} days, retention: {} days, max strings: {}",
        config.pipeline.window_days,
        config.pipeline.retention_days,
        config.pipeline.max_string_count
    );

    let store = Arc::new(SqliteStore::open(&config.database.path)?);
    let scheduler = Scheduler::new(store, config.pipeline_config(), config.scheduler_config()?);

    match cli.command {
        Some(Command::RunNow) => {
            info!("Manual trigger, running once");
            let report = scheduler.trigger_now().await?;
            info!(
                "✅ Run for {} complete: {} rows written ({} devices, {} skipped, {} failed)",
                report.calculation_date,
                report.rows_written,
                report.devices_total,
                report.devices_skipped,
                report.devices_failed
            );
        }
        None => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for shutdown signal: {e}");
                }
                let _ = shutdown_tx.send(true);
            });

            scheduler.run_forever(shutdown_rx).await;
            info!("Scheduler stopped");
        }
    }

    Ok(())
}
