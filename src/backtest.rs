//! Backtesting module for walk-forward validation.
//!
//! The evaluator scores races one at a time (combine, stake, attach finishing
//! positions) and aggregates the per-race scores. Walk-forward runs repeat
//! this over the validation set of every fold; replay runs it once over a
//! whole meeting.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{info, warn};

use crate::betting::race_stakes;
use crate::calibration::CalibrationReport;
use crate::config::{AppConfig, BettingConfig};
use crate::data::ResultBook;
use crate::error::ModelError;
use crate::folds::{self, FoldAxis, FoldKey};
use crate::metrics::{
    group_by_race, hit_rate_by_distance, top_pick, DistanceHitRate, FoldSpread, RaceMetrics,
    RunMetrics,
};
use crate::model::Combiner;
use crate::types::{
    normalize_horse_name, EvaluatedRunner, Race, RaceEntry, RaceKey, RunnerEstimate,
    UNPLACED_POSITION,
};

/// Fold number stamped on replay rows.
pub const REPLAY_FOLD: usize = 0;

/// Scores races with a fixed combiner and staking policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
    pub combiner: Combiner,
    pub betting: BettingConfig,
}

/// One scored race.
#[derive(Debug, Clone)]
pub struct ScoredRace {
    pub runners: Vec<EvaluatedRunner>,
    pub metrics: RaceMetrics,
    pub unmatched_placings: usize,
}

/// Result of evaluating a set of rows.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub rows: Vec<EvaluatedRunner>,
    pub races: Vec<RaceMetrics>,
    pub metrics: RunMetrics,
    pub skipped_races: usize,
    pub unmatched_placings: usize,
}

impl Evaluator {
    pub fn from_config(config: &AppConfig) -> Self {
        let mut combiner = Combiner::new(config.model.market_source);
        combiner.default_market_prob = config.model.default_market_prob;
        Self {
            combiner,
            betting: config.betting,
        }
    }

    /// Combine, stake and attach finishing positions for one race.
    pub fn score_race(
        &self,
        race: &Race,
        fold: usize,
        results: &ResultBook,
    ) -> Result<ScoredRace, ModelError> {
        let estimates = self.combiner.combine(race)?;
        let stakes = race_stakes(&estimates, &self.betting);

        let runner_keys: Vec<String> = race.runners.iter().map(|r| r.match_key()).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        for (runner, key) in race.runners.iter().zip(&runner_keys) {
            if !seen.insert(key.as_str()) {
                warn!(
                    race = %race.key,
                    horse = %runner.horse,
                    "runner name collides with another runner after normalization, only the first is matched to results"
                );
            }
        }

        let mut positions: HashMap<String, u32> = HashMap::new();
        let mut unmatched_placings = 0;
        for placing in results.placings(&race.key) {
            let name = normalize_horse_name(&placing.horse);
            if runner_keys.contains(&name) {
                positions.entry(name).or_insert(placing.pos);
            } else {
                let e = ModelError::UnmatchedResult {
                    race_no: race.key.race_no,
                    horse: placing.horse.clone(),
                    pos: placing.pos,
                };
                warn!("{}", e);
                unmatched_placings += 1;
            }
        }

        let runners: Vec<EvaluatedRunner> = race
            .runners
            .iter()
            .zip(&runner_keys)
            .zip(estimates.into_iter().zip(stakes))
            .map(|((runner, key), (est, stake))| EvaluatedRunner {
                fold,
                key: race.key,
                race_name: race.race_name.clone(),
                distance_m: race.distance_m,
                horse: runner.horse.clone(),
                age: runner.age,
                rating: runner.rating,
                weight_kg: runner.weight_kg,
                p_market: est.p_market,
                p_prior: est.p_prior,
                p_posterior: est.p_posterior,
                kelly_stake: stake,
                position: positions.remove(key).unwrap_or(UNPLACED_POSITION),
            })
            .collect();

        let metrics = RaceMetrics::score(&runners);
        Ok(ScoredRace {
            runners,
            metrics,
            unmatched_placings,
        })
    }

    /// Evaluate every race in `entries`, stamping rows with `fold`.
    ///
    /// Races are scored in parallel and joined in race-key order. Races with
    /// no runners are skipped with a warning.
    pub fn evaluate(&self, entries: &[RaceEntry], fold: usize, results: &ResultBook) -> Evaluation {
        let races = Race::group(entries);
        let scored: Vec<Result<ScoredRace, ModelError>> = races
            .par_iter()
            .map(|race| self.score_race(race, fold, results))
            .collect();

        let mut eval = Evaluation::default();
        for outcome in scored {
            match outcome {
                Ok(race) => {
                    eval.unmatched_placings += race.unmatched_placings;
                    eval.rows.extend(race.runners);
                    eval.races.push(race.metrics);
                }
                Err(e) => {
                    warn!("skipping race: {}", e);
                    eval.skipped_races += 1;
                }
            }
        }
        eval.metrics = RunMetrics::from_races(&eval.races);
        eval
    }

    /// Score race cards without results.
    pub fn predict(&self, entries: &[RaceEntry]) -> Vec<RacePrediction> {
        let races = Race::group(entries);
        races
            .par_iter()
            .filter_map(|race| match self.combiner.combine(race) {
                Ok(estimates) => {
                    let stakes = race_stakes(&estimates, &self.betting);
                    Some(RacePrediction::new(race, estimates, stakes))
                }
                Err(e) => {
                    warn!("skipping race: {}", e);
                    None
                }
            })
            .collect()
    }
}

/// Highest-posterior runner of a race.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopPick {
    pub key: RaceKey,
    pub race_name: String,
    pub horse: String,
    pub p_posterior: f64,
    pub kelly_stake: f64,
    /// `None` when the runner has no recorded placing.
    pub position: Option<u32>,
}

/// Top pick of every race in an evaluated table, in race order.
pub fn top_picks(rows: &[EvaluatedRunner]) -> Vec<TopPick> {
    group_by_race(rows)
        .iter()
        .filter_map(|race| top_pick(race))
        .map(|r| TopPick {
            key: r.key,
            race_name: r.race_name.clone(),
            horse: r.horse.clone(),
            p_posterior: r.p_posterior,
            kelly_stake: r.kelly_stake,
            position: (r.position != UNPLACED_POSITION).then_some(r.position),
        })
        .collect()
}

/// Predicted probabilities and stakes for one race card.
#[derive(Debug, Clone, Serialize)]
pub struct RacePrediction {
    pub key: RaceKey,
    pub race_name: String,
    pub distance_m: u32,
    pub is_route: bool,
    pub runners: Vec<PredictedRunner>,
    pub top_pick: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictedRunner {
    #[serde(flatten)]
    pub estimate: RunnerEstimate,
    pub kelly_stake: f64,
}

impl RacePrediction {
    fn new(race: &Race, estimates: Vec<RunnerEstimate>, stakes: Vec<f64>) -> Self {
        let mut top: Option<&RunnerEstimate> = None;
        for e in &estimates {
            match top {
                Some(t) if e.p_posterior <= t.p_posterior => {}
                _ => top = Some(e),
            }
        }
        let top_pick = top.map(|e| e.horse.clone()).unwrap_or_default();
        Self {
            key: race.key,
            race_name: race.race_name.clone(),
            distance_m: race.distance_m,
            is_route: race.is_route(),
            runners: estimates
                .into_iter()
                .zip(stakes)
                .map(|(estimate, kelly_stake)| PredictedRunner { estimate, kelly_stake })
                .collect(),
            top_pick,
        }
    }
}

/// Metrics of one walk-forward fold.
#[derive(Debug, Clone, Serialize)]
pub struct FoldReport {
    pub fold: usize,
    pub name: String,
    pub first_key: Option<FoldKey>,
    pub last_key: Option<FoldKey>,
    pub train_runners: usize,
    pub train_races: usize,
    pub validation_runners: usize,
    pub validation_races: usize,
    pub skipped_races: usize,
    pub unmatched_placings: usize,
    pub metrics: RunMetrics,
}

/// Scores of an evaluated table: run metrics plus diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub metrics: RunMetrics,
    pub hit_rate_by_distance: Vec<DistanceHitRate>,
    pub calibration: CalibrationReport,
    pub top_picks: Vec<TopPick>,
}

impl MetricsReport {
    /// Re-score an evaluated table, e.g. one read back from disk.
    pub fn from_rows(rows: &[EvaluatedRunner], calibration_bins: usize) -> Self {
        let races: Vec<RaceMetrics> = group_by_race(rows)
            .iter()
            .map(|r| RaceMetrics::score(r))
            .collect();
        Self::build(rows, &races, calibration_bins)
    }

    fn build(rows: &[EvaluatedRunner], races: &[RaceMetrics], calibration_bins: usize) -> Self {
        Self {
            metrics: RunMetrics::from_races(races),
            hit_rate_by_distance: hit_rate_by_distance(races),
            calibration: CalibrationReport::build(rows, calibration_bins),
            top_picks: top_picks(rows),
        }
    }
}

/// Walk-forward backtest output.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub axis: FoldAxis,
    pub folds: Vec<FoldReport>,
    pub spread: FoldSpread,
    /// Scores pooled over every validation race.
    pub pooled: MetricsReport,
    /// Placings matching no runner, including records for races not in the features.
    pub unmatched_placings: usize,
    #[serde(skip)]
    pub rows: Vec<EvaluatedRunner>,
}

impl BacktestReport {
    pub fn fold_metrics(&self) -> Vec<(String, RunMetrics)> {
        self.folds
            .iter()
            .map(|f| (f.name.clone(), f.metrics.clone()))
            .collect()
    }
}

fn count_races(entries: &[RaceEntry]) -> usize {
    let mut keys: Vec<RaceKey> = entries.iter().map(|e| e.key).collect();
    keys.sort();
    keys.dedup();
    keys.len()
}

/// Warn about and count placings in result records that no evaluated race
/// consumed.
pub fn unconsumed_placings(entries: &[RaceEntry], results: &ResultBook) -> usize {
    let race_keys: BTreeSet<RaceKey> = entries.iter().map(|e| e.key).collect();
    let used: HashSet<RaceKey> = race_keys.iter().filter_map(|k| results.resolve(k)).collect();

    let mut count = 0;
    for (key, placings) in results.unused(&used) {
        for placing in placings {
            let e = ModelError::UnmatchedResult {
                race_no: key.race_no,
                horse: placing.horse.clone(),
                pos: placing.pos,
            };
            warn!(race = %key, "{} (race not in features)", e);
            count += 1;
        }
    }
    count
}

/// Run the walk-forward backtest.
///
/// Rows are stamped with the one-based fold number.
pub fn run_walkforward(
    evaluator: &Evaluator,
    entries: &[RaceEntry],
    results: &ResultBook,
    n_folds: usize,
    calibration_bins: usize,
) -> Result<BacktestReport, ModelError> {
    let plan = folds::split(entries, n_folds)?;
    info!(axis = ?plan.axis, folds = plan.folds.len(), "running walk-forward backtest");

    let evaluated: Vec<(FoldReport, Evaluation)> = plan
        .folds
        .par_iter()
        .map(|fold| {
            let number = fold.index + 1;
            let eval = evaluator.evaluate(&fold.validation, number, results);
            let (first_key, last_key) = fold.key_range().unzip();
            let report = FoldReport {
                fold: number,
                name: fold.name(),
                first_key,
                last_key,
                train_runners: fold.train.len(),
                train_races: count_races(&fold.train),
                validation_runners: fold.validation.len(),
                validation_races: count_races(&fold.validation),
                skipped_races: eval.skipped_races,
                unmatched_placings: eval.unmatched_placings,
                metrics: eval.metrics.clone(),
            };
            (report, eval)
        })
        .collect();

    let mut fold_reports = Vec::with_capacity(evaluated.len());
    let mut rows = Vec::new();
    let mut races = Vec::new();
    for (report, eval) in evaluated {
        info!(
            fold = report.fold,
            train_races = report.train_races,
            train_runners = report.train_runners,
            validation_races = report.validation_races,
            validation_runners = report.validation_runners,
            logloss = report.metrics.logloss,
            hit_rate = report.metrics.hit_rate,
            roi = report.metrics.roi,
            "{} complete",
            report.name
        );
        if report.validation_races == 0 {
            warn!(fold = report.fold, "empty validation fold");
        }
        rows.extend(eval.rows);
        races.extend(eval.races);
        fold_reports.push(report);
    }

    let per_fold: Vec<RunMetrics> = fold_reports.iter().map(|f| f.metrics.clone()).collect();
    let pooled = MetricsReport::build(&rows, &races, calibration_bins);
    let unmatched_placings = fold_reports
        .iter()
        .map(|f| f.unmatched_placings)
        .sum::<usize>()
        + unconsumed_placings(entries, results);

    Ok(BacktestReport {
        axis: plan.axis,
        folds: fold_reports,
        spread: FoldSpread::of(&per_fold),
        pooled,
        unmatched_placings,
        rows,
    })
}

/// Replay a single meeting: every race, no folds.
pub fn replay(
    evaluator: &Evaluator,
    entries: &[RaceEntry],
    results: &ResultBook,
    calibration_bins: usize,
) -> (Evaluation, MetricsReport) {
    let mut eval = evaluator.evaluate(entries, REPLAY_FOLD, results);
    eval.unmatched_placings += unconsumed_placings(entries, results);
    info!(
        races = eval.races.len(),
        skipped = eval.skipped_races,
        unmatched_placings = eval.unmatched_placings,
        "replay complete"
    );
    let report = MetricsReport::build(&eval.rows, &eval.races, calibration_bins);
    (eval, report)
}

fn print_run_metrics(metrics: &RunMetrics) {
    println!("  Races:         {}", metrics.n_races);
    println!("  Logloss:       {:.4}", metrics.logloss);
    println!("  Hit Rate:      {:.2}%", metrics.hit_rate * 100.0);
    println!("  ROI:           {:.2}%", metrics.roi * 100.0);
    println!("  Total Staked:  {:.4}", metrics.total_staked);
    println!("  Net Return:    {:.4}", metrics.net_return);
    println!("  Max Drawdown:  {:.4}", metrics.max_drawdown);
}

fn print_diagnostics(report: &MetricsReport) {
    if !report.hit_rate_by_distance.is_empty() {
        println!();
        println!("Hit Rate by Distance:");
        println!("  {:>8} {:>8} {:>10}", "Dist", "Races", "Hit Rate");
        println!("  {}", "-".repeat(28));
        for d in &report.hit_rate_by_distance {
            println!(
                "  {:>8} {:>8} {:>9.1}%",
                d.distance_m,
                d.n_races,
                d.hit_rate * 100.0
            );
        }
    }

    if !report.calibration.bins.is_empty() {
        println!();
        println!(
            "Calibration (ECE {:.4}):",
            report.calibration.expected_calibration_error
        );
        println!(
            "  {:>11} {:>10} {:>10} {:>8}",
            "Bin", "Predicted", "Observed", "Count"
        );
        println!("  {}", "-".repeat(42));
        for b in &report.calibration.bins {
            println!(
                "  {:.2}-{:.2}  {:>10.4} {:>10.4} {:>8}",
                b.lower, b.upper, b.mean_predicted, b.observed_rate, b.count
            );
        }
    }

    if !report.top_picks.is_empty() {
        println!();
        println!("Top Picks:");
        println!(
            "  {:16} {:24} {:>9} {:>7} {:>5}",
            "Race", "Horse", "Posterior", "Stake", "Pos"
        );
        println!("  {}", "-".repeat(65));
        for p in &report.top_picks {
            let pos = p
                .position
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:16} {:24} {:>9.4} {:>7.4} {:>5}",
                p.key.to_string(),
                p.horse,
                p.p_posterior,
                p.kelly_stake,
                pos
            );
        }
    }
}

/// Print backtest results in table format.
pub fn print_backtest_table(report: &BacktestReport) {
    println!("=== Walk-Forward Backtest ===");
    println!();
    println!("Fold Results:");
    println!(
        "  {:8} {:>12} {:>12} {:>7} {:>9} {:>9} {:>9}",
        "Fold", "From", "To", "Races", "Logloss", "Hit", "ROI"
    );
    println!("  {}", "-".repeat(72));
    for f in &report.folds {
        let key = |k: Option<FoldKey>| k.map(|k| k.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "  {:8} {:>12} {:>12} {:>7} {:>9.4} {:>8.1}% {:>8.1}%",
            f.name,
            key(f.first_key),
            key(f.last_key),
            f.validation_races,
            f.metrics.logloss,
            f.metrics.hit_rate * 100.0,
            f.metrics.roi * 100.0
        );
    }
    println!();
    println!("Across Folds (mean ± std, n = {}):", report.spread.n_folds);
    println!(
        "  Logloss:       {:.4} ± {:.4}",
        report.spread.logloss.mean, report.spread.logloss.std
    );
    println!(
        "  Hit Rate:      {:.2}% ± {:.2}%",
        report.spread.hit_rate.mean * 100.0,
        report.spread.hit_rate.std * 100.0
    );
    println!(
        "  ROI:           {:.2}% ± {:.2}%",
        report.spread.roi.mean * 100.0,
        report.spread.roi.std * 100.0
    );
    println!();
    println!("Pooled:");
    print_run_metrics(&report.pooled.metrics);
    println!("  Unmatched:     {} placings", report.unmatched_placings);
    print_diagnostics(&report.pooled);
}

/// Print a metrics report in table format.
pub fn print_metrics_table(title: &str, report: &MetricsReport) {
    println!("=== {} ===", title);
    println!();
    print_run_metrics(&report.metrics);
    print_diagnostics(report);
}

/// Print race card predictions in table format.
pub fn print_predictions_table(predictions: &[RacePrediction]) {
    for race in predictions {
        let kind = if race.is_route { "route" } else { "sprint" };
        println!(
            "=== {} {} ({}m {}) ===",
            race.key, race.race_name, race.distance_m, kind
        );
        println!(
            "  {:24} {:>8} {:>8} {:>9} {:>7}",
            "Horse", "Market", "Prior", "Posterior", "Stake"
        );
        println!("  {}", "-".repeat(60));
        for r in &race.runners {
            println!(
                "  {:24} {:>8.4} {:>8.4} {:>9.4} {:>7.4}",
                r.estimate.horse,
                r.estimate.p_market,
                r.estimate.p_prior,
                r.estimate.p_posterior,
                r.kelly_stake
            );
        }
        println!("  Top pick: {}", race.top_pick);
        println!();
    }
}
