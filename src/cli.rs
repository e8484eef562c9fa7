//! CLI commands for benter.
//!
//! Walk-forward backtesting, single-meeting replay, re-scoring of written
//! tables, and race card prediction.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::backtest::{
    self, print_backtest_table, print_metrics_table, print_predictions_table, Evaluator,
    MetricsReport,
};
use crate::config::AppConfig;
use crate::data::{self, FeatureTable};
use crate::types::MarketSnapshot;

#[derive(Parser)]
#[command(name = "benter")]
#[command(version, about = "Benter-style market/prior combiner and walk-forward backtester", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a walk-forward backtest over historical races
    Backtest {
        /// Path to the features table (parquet or csv)
        #[arg(value_name = "FEATURES")]
        features: PathBuf,

        /// Path to the results JSON file
        #[arg(short, long)]
        results: PathBuf,

        /// Number of walk-forward folds
        #[arg(long)]
        folds: Option<usize>,

        /// Market snapshot to combine with (night, morning, opening)
        #[arg(short, long)]
        market: Option<String>,

        /// Write the per-runner table (csv or parquet)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write per-fold metrics (csv or parquet)
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Write the calibration table (csv or parquet)
        #[arg(long)]
        calibration_out: Option<PathBuf>,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Replay a single meeting without folds
    Replay {
        /// Path to the features table (parquet or csv)
        #[arg(value_name = "FEATURES")]
        features: PathBuf,

        /// Path to the results JSON file
        #[arg(short, long)]
        results: PathBuf,

        /// Per-runner output table (csv or parquet)
        #[arg(short, long)]
        output: PathBuf,

        /// Market snapshot to combine with (night, morning, opening)
        #[arg(short, long)]
        market: Option<String>,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Re-score a previously written per-runner table
    Metrics {
        /// Path to the per-runner table (csv or parquet)
        #[arg(value_name = "TABLE")]
        table: PathBuf,

        /// Number of calibration bins
        #[arg(long)]
        bins: Option<usize>,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Score race cards without results
    Predict {
        /// Path to the features table (parquet or csv)
        #[arg(value_name = "FEATURES")]
        features: PathBuf,

        /// Market snapshot to combine with (night, morning, opening)
        #[arg(short, long)]
        market: Option<String>,

        /// Output format (json, table)
        #[arg(short, long, default_value = "json")]
        format: String,
    },
}

fn apply_market(config: &mut AppConfig, market: Option<String>) -> anyhow::Result<()> {
    if let Some(m) = market {
        config.model.market_source = MarketSnapshot::from_str(&m).ok_or_else(|| {
            anyhow::anyhow!("Unknown market snapshot: {}. Use night, morning or opening", m)
        })?;
    }
    Ok(())
}

fn load_features(path: &Path) -> anyhow::Result<FeatureTable> {
    eprintln!("Loading features from: {}", path.display());
    let table = data::load_features(path)
        .with_context(|| format!("Failed to load features from {}", path.display()))?;
    eprintln!(
        "Loaded {} runners ({} excluded for missing fields)",
        table.entries.len(),
        table.rejected.len()
    );
    Ok(table)
}

fn load_results(path: &Path) -> anyhow::Result<data::ResultBook> {
    eprintln!("Loading results from: {}", path.display());
    let book = data::load_results(path)
        .with_context(|| format!("Failed to load results from {}", path.display()))?;
    if book.is_empty() {
        warn!("results file {} lists no races", path.display());
    }
    eprintln!("Loaded results for {} races", book.len());
    Ok(book)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the walk-forward backtest.
#[allow(clippy::too_many_arguments)]
pub fn run_backtest(
    features_path: PathBuf,
    results_path: PathBuf,
    folds: Option<usize>,
    market: Option<String>,
    output: Option<PathBuf>,
    summary: Option<PathBuf>,
    calibration_out: Option<PathBuf>,
    format: String,
) -> anyhow::Result<()> {
    // Load configuration
    let mut config = AppConfig::load()?;
    apply_market(&mut config, market)?;
    if let Some(n) = folds {
        config.backtest.n_folds = n;
    }

    // All inputs are read before anything is written
    let table = load_features(&features_path)?;
    let results = load_results(&results_path)?;

    let evaluator = Evaluator::from_config(&config);
    eprintln!(
        "Running walk-forward backtest with {} folds on {} market...",
        config.backtest.n_folds, config.model.market_source
    );
    let report = backtest::run_walkforward(
        &evaluator,
        &table.entries,
        &results,
        config.backtest.n_folds,
        config.backtest.calibration_bins,
    )?;

    if let Some(path) = output {
        data::write_runner_table(&report.rows, &path)?;
    }
    if let Some(path) = summary {
        data::write_fold_summary(&report.fold_metrics(), &path)?;
    }
    if let Some(path) = calibration_out {
        data::write_calibration(&report.pooled.calibration, &path)?;
    }

    match format.as_str() {
        "json" => print_json(&report)?,
        "table" => print_backtest_table(&report),
        _ => {
            eprintln!("Unknown format: {}. Using table.", format);
            print_backtest_table(&report);
        }
    }

    Ok(())
}

/// Replay one meeting and write the per-runner table.
pub fn run_replay(
    features_path: PathBuf,
    results_path: PathBuf,
    output: PathBuf,
    market: Option<String>,
    format: String,
) -> anyhow::Result<()> {
    let mut config = AppConfig::load()?;
    apply_market(&mut config, market)?;

    let table = load_features(&features_path)?;
    let results = load_results(&results_path)?;

    let evaluator = Evaluator::from_config(&config);
    let (eval, report) = backtest::replay(
        &evaluator,
        &table.entries,
        &results,
        config.backtest.calibration_bins,
    );
    data::write_runner_table(&eval.rows, &output)?;
    info!(
        skipped = eval.skipped_races,
        unmatched_placings = eval.unmatched_placings,
        "replay written to {}",
        output.display()
    );

    match format.as_str() {
        "json" => print_json(&report)?,
        _ => print_metrics_table("Replay", &report),
    }
    Ok(())
}

/// Re-score a written per-runner table.
pub fn run_metrics(table_path: PathBuf, bins: Option<usize>, format: String) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let bins = bins.unwrap_or(config.backtest.calibration_bins);
    if bins == 0 {
        anyhow::bail!("--bins must be at least 1");
    }

    let rows = data::read_runner_table(&table_path)
        .with_context(|| format!("Failed to read table {}", table_path.display()))?;
    eprintln!("Loaded {} runner rows", rows.len());

    let report = MetricsReport::from_rows(&rows, bins);
    match format.as_str() {
        "json" => print_json(&report)?,
        _ => print_metrics_table("Metrics", &report),
    }
    Ok(())
}

/// Score race cards.
pub fn run_predict(features_path: PathBuf, market: Option<String>, format: String) -> anyhow::Result<()> {
    let mut config = AppConfig::load()?;
    apply_market(&mut config, market)?;

    let table = load_features(&features_path)?;
    let predictions = Evaluator::from_config(&config).predict(&table.entries);
    eprintln!("Scored {} races", predictions.len());

    match format.as_str() {
        "json" => print_json(&predictions)?,
        "table" => print_predictions_table(&predictions),
        _ => {
            eprintln!("Unknown format: {}. Using JSON.", format);
            print_json(&predictions)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backtest_args() {
        let cli = Cli::try_parse_from([
            "benter",
            "backtest",
            "features.parquet",
            "--results",
            "results.json",
            "--folds",
            "3",
            "--market",
            "morning",
            "--output",
            "table.csv",
        ])
        .unwrap();
        match cli.command {
            Commands::Backtest {
                features,
                folds,
                market,
                output,
                format,
                ..
            } => {
                assert_eq!(features, PathBuf::from("features.parquet"));
                assert_eq!(folds, Some(3));
                assert_eq!(market.as_deref(), Some("morning"));
                assert_eq!(output, Some(PathBuf::from("table.csv")));
                assert_eq!(format, "table");
            }
            _ => panic!("Expected backtest command"),
        }
    }

    #[test]
    fn test_replay_requires_output() {
        assert!(Cli::try_parse_from([
            "benter",
            "replay",
            "features.csv",
            "--results",
            "results.json"
        ])
        .is_err());
    }

    #[test]
    fn test_apply_market() {
        let mut config = AppConfig::default();
        apply_market(&mut config, Some("night".to_string())).unwrap();
        assert_eq!(config.model.market_source, MarketSnapshot::Night);
        apply_market(&mut config, None).unwrap();
        assert_eq!(config.model.market_source, MarketSnapshot::Night);
        assert!(apply_market(&mut config, Some("closing".to_string())).is_err());
    }
}
