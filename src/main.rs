//! Benter
//!
//! Market/prior posterior combiner for horse races with Kelly staking and a
//! walk-forward backtester.

mod backtest;
mod betting;
mod calibration;
mod cli;
mod config;
mod data;
mod error;
mod folds;
mod metrics;
mod model;
mod types;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "benter=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Backtest {
            features,
            results,
            folds,
            market,
            output,
            summary,
            calibration_out,
            format,
        } => cli::run_backtest(
            features,
            results,
            folds,
            market,
            output,
            summary,
            calibration_out,
            format,
        ),
        Commands::Replay {
            features,
            results,
            output,
            market,
            format,
        } => cli::run_replay(features, results, output, market, format),
        Commands::Metrics {
            table,
            bins,
            format,
        } => cli::run_metrics(table, bins, format),
        Commands::Predict {
            features,
            market,
            format,
        } => cli::run_predict(features, market, format),
    }
}
