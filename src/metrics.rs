//! Per-race and run-level scoring: logloss, top-pick hit rate, ROI.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::{EvaluatedRunner, RaceKey};

/// Negative log of the posterior assigned to the winner.
///
/// 0 when no runner is recorded as the winner. This is a no-penalty
/// placeholder, not a likelihood.
pub fn race_logloss(runners: &[EvaluatedRunner]) -> f64 {
    runners
        .iter()
        .find(|r| r.is_winner())
        .map(|w| -w.p_posterior.ln())
        .unwrap_or(0.0)
}

/// Runner with the highest posterior. Ties go to the first in stored order.
pub fn top_pick(runners: &[EvaluatedRunner]) -> Option<&EvaluatedRunner> {
    let mut best: Option<&EvaluatedRunner> = None;
    for r in runners {
        match best {
            Some(b) if r.p_posterior <= b.p_posterior => {}
            _ => best = Some(r),
        }
    }
    best
}

/// Net return of a race in bankroll fractions.
///
/// `(decimal odds of winner - 1) * winner stake - total stake`, with a winner
/// stake of 0 when the winner is not backed or not recorded.
pub fn race_net_return(runners: &[EvaluatedRunner]) -> f64 {
    let total_stake: f64 = runners.iter().map(|r| r.kelly_stake).sum();
    if total_stake == 0.0 {
        return 0.0;
    }
    match runners.iter().find(|r| r.is_winner()) {
        Some(w) if w.kelly_stake > 0.0 => {
            (1.0 / w.p_market - 1.0) * w.kelly_stake - total_stake
        }
        _ => -total_stake,
    }
}

/// Return on the stake placed on a race.
///
/// 0 when nothing was staked, -1 when the winner was not backed.
pub fn race_roi(runners: &[EvaluatedRunner]) -> f64 {
    let total_stake: f64 = runners.iter().map(|r| r.kelly_stake).sum();
    if total_stake == 0.0 {
        return 0.0;
    }
    race_net_return(runners) / total_stake
}

/// Scores of a single race.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaceMetrics {
    pub key: RaceKey,
    pub distance_m: u32,
    pub n_runners: usize,
    pub has_winner: bool,
    pub logloss: f64,
    pub hit: bool,
    pub roi: f64,
    pub total_stake: f64,
    pub net_return: f64,
}

impl RaceMetrics {
    /// Score the runners of one race. `runners` must not be empty.
    pub fn score(runners: &[EvaluatedRunner]) -> Self {
        let first = &runners[0];
        Self {
            key: first.key,
            distance_m: first.distance_m,
            n_runners: runners.len(),
            has_winner: runners.iter().any(|r| r.is_winner()),
            logloss: race_logloss(runners),
            hit: top_pick(runners).map(|r| r.is_winner()).unwrap_or(false),
            roi: race_roi(runners),
            total_stake: runners.iter().map(|r| r.kelly_stake).sum(),
            net_return: race_net_return(runners),
        }
    }
}

/// Metrics averaged over the races of a fold or a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunMetrics {
    pub n_races: usize,
    pub logloss: f64,
    pub hit_rate: f64,
    pub roi: f64,
    pub total_staked: f64,
    pub net_return: f64,
    pub max_drawdown: f64,
}

impl RunMetrics {
    /// Arithmetic means over races; all zeros for no races.
    pub fn from_races(races: &[RaceMetrics]) -> Self {
        if races.is_empty() {
            return Self::default();
        }
        let n = races.len() as f64;
        Self {
            n_races: races.len(),
            logloss: races.iter().map(|r| r.logloss).sum::<f64>() / n,
            hit_rate: races.iter().filter(|r| r.hit).count() as f64 / n,
            roi: races.iter().map(|r| r.roi).sum::<f64>() / n,
            total_staked: races.iter().map(|r| r.total_stake).sum(),
            net_return: races.iter().map(|r| r.net_return).sum(),
            max_drawdown: max_drawdown(races.iter().map(|r| r.net_return)),
        }
    }
}

/// Largest peak-to-trough drop of the cumulative net return.
pub fn max_drawdown<I: IntoIterator<Item = f64>>(returns: I) -> f64 {
    let mut peak = 0.0;
    let mut max_dd = 0.0;
    let mut cumulative = 0.0;

    for r in returns {
        cumulative += r;
        if cumulative > peak {
            peak = cumulative;
        }
        let dd = peak - cumulative;
        if dd > max_dd {
            max_dd = dd;
        }
    }
    max_dd
}

/// Mean and sample standard deviation of a metric across folds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Spread {
    pub mean: f64,
    pub std: f64,
}

impl Spread {
    /// Sample standard deviation (n - 1); 0 with fewer than two values.
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = if values.len() < 2 {
            0.0
        } else {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        };
        Self { mean, std }
    }
}

/// Fold-level metrics summarized across folds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FoldSpread {
    pub n_folds: usize,
    pub logloss: Spread,
    pub hit_rate: Spread,
    pub roi: Spread,
}

impl FoldSpread {
    pub fn of(folds: &[RunMetrics]) -> Self {
        let collect = |f: fn(&RunMetrics) -> f64| folds.iter().map(f).collect::<Vec<_>>();
        Self {
            n_folds: folds.len(),
            logloss: Spread::of(&collect(|m| m.logloss)),
            hit_rate: Spread::of(&collect(|m| m.hit_rate)),
            roi: Spread::of(&collect(|m| m.roi)),
        }
    }
}

/// Top-pick hit rate for one race distance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistanceHitRate {
    pub distance_m: u32,
    pub n_races: usize,
    pub hit_rate: f64,
}

/// Top-pick hit rate per race distance, ascending by distance.
pub fn hit_rate_by_distance(races: &[RaceMetrics]) -> Vec<DistanceHitRate> {
    let mut by_distance: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
    for r in races {
        let entry = by_distance.entry(r.distance_m).or_default();
        entry.0 += 1;
        if r.hit {
            entry.1 += 1;
        }
    }
    by_distance
        .into_iter()
        .map(|(distance_m, (n, hits))| DistanceHitRate {
            distance_m,
            n_races: n,
            hit_rate: hits as f64 / n as f64,
        })
        .collect()
}

/// Group evaluated rows into races keyed by (fold, race), preserving row order.
pub fn group_by_race(rows: &[EvaluatedRunner]) -> Vec<Vec<EvaluatedRunner>> {
    let mut races: BTreeMap<(usize, RaceKey), Vec<EvaluatedRunner>> = BTreeMap::new();
    for row in rows {
        races.entry((row.fold, row.key)).or_default().push(row.clone());
    }
    races.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(horse: &str, p_market: f64, p_posterior: f64, stake: f64, position: u32) -> EvaluatedRunner {
        EvaluatedRunner {
            fold: 1,
            key: RaceKey::new(None, 1),
            race_name: "Test".to_string(),
            distance_m: 1200,
            horse: horse.to_string(),
            age: 4,
            rating: 40,
            weight_kg: 55.0,
            p_market,
            p_prior: p_posterior,
            p_posterior,
            kelly_stake: stake,
            position,
        }
    }

    #[test]
    fn test_logloss_of_winner() {
        let race = vec![
            runner("A", 0.3, 0.35, 0.0, 2),
            runner("B", 0.4, 0.40, 0.0, 1),
            runner("C", 0.3, 0.25, 0.0, 3),
        ];
        assert!((race_logloss(&race) - 0.9163).abs() < 1e-4);
    }

    #[test]
    fn test_logloss_without_winner() {
        let race = vec![runner("A", 0.5, 0.5, 0.0, 99), runner("B", 0.5, 0.5, 0.0, 2)];
        assert_eq!(race_logloss(&race), 0.0);
    }

    #[test]
    fn test_top_pick_tie_goes_to_first() {
        let race = vec![
            runner("A", 0.2, 0.2, 0.0, 3),
            runner("B", 0.4, 0.4, 0.0, 2),
            runner("C", 0.4, 0.4, 0.0, 1),
        ];
        assert_eq!(top_pick(&race).unwrap().horse, "B");
        assert!(!RaceMetrics::score(&race).hit);
        assert!(top_pick(&[]).is_none());
    }

    #[test]
    fn test_roi_winner_staked() {
        // Stake 0.10 on the winner at p_market 0.25 (odds 4.0)
        let race = vec![runner("A", 0.25, 0.5, 0.10, 1), runner("B", 0.75, 0.5, 0.0, 2)];
        assert!((race_net_return(&race) - 0.20).abs() < 1e-12);
        assert!((race_roi(&race) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_roi_winner_not_staked() {
        let race = vec![runner("A", 0.25, 0.5, 0.10, 2), runner("B", 0.75, 0.5, 0.0, 1)];
        assert_eq!(race_roi(&race), -1.0);
        assert!((race_net_return(&race) + 0.10).abs() < 1e-12);

        // No recorded winner at all
        let race = vec![runner("A", 0.25, 0.5, 0.05, 99)];
        assert_eq!(race_roi(&race), -1.0);
    }

    #[test]
    fn test_roi_no_stake() {
        let race = vec![runner("A", 0.25, 0.5, 0.0, 1)];
        assert_eq!(race_roi(&race), 0.0);
        assert_eq!(race_net_return(&race), 0.0);
    }

    #[test]
    fn test_run_metrics_means() {
        let r1 = RaceMetrics::score(&[runner("A", 0.25, 0.5, 0.10, 1), runner("B", 0.75, 0.5, 0.0, 2)]);
        let r2 = RaceMetrics::score(&[runner("A", 0.5, 0.6, 0.05, 2), runner("B", 0.5, 0.4, 0.0, 1)]);
        let run = RunMetrics::from_races(&[r1, r2]);
        assert_eq!(run.n_races, 2);
        assert!((run.hit_rate - 0.5).abs() < 1e-12);
        assert!((run.roi - 0.5).abs() < 1e-12); // (2.0 + -1.0) / 2
        assert!((run.total_staked - 0.15).abs() < 1e-12);
        assert!((run.net_return - 0.15).abs() < 1e-12);
        assert!((run.max_drawdown - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_run_metrics_empty() {
        assert_eq!(RunMetrics::from_races(&[]), RunMetrics::default());
    }

    #[test]
    fn test_max_drawdown() {
        // +100, +100, -300, +200: peak 200, trough -100
        let dd = max_drawdown([100.0, 100.0, -300.0, 200.0]);
        assert!((dd - 300.0).abs() < 0.01);
    }

    #[test]
    fn test_spread() {
        let s = Spread::of(&[1.0, 2.0, 3.0]);
        assert!((s.mean - 2.0).abs() < 1e-12);
        assert!((s.std - 1.0).abs() < 1e-12);
        assert_eq!(Spread::of(&[4.0]).std, 0.0);
        assert_eq!(Spread::of(&[]), Spread::default());
    }

    #[test]
    fn test_hit_rate_by_distance() {
        let mut a = runner("A", 0.5, 0.6, 0.0, 1);
        a.distance_m = 1600;
        let mut b = runner("B", 0.5, 0.6, 0.0, 2);
        b.distance_m = 1200;
        let mut c = runner("C", 0.5, 0.6, 0.0, 1);
        c.distance_m = 1600;
        let races: Vec<_> = [a, b, c].into_iter().map(|r| RaceMetrics::score(&[r])).collect();
        let by_dist = hit_rate_by_distance(&races);
        assert_eq!(by_dist.len(), 2);
        assert_eq!(by_dist[0].distance_m, 1200);
        assert_eq!(by_dist[0].hit_rate, 0.0);
        assert_eq!(by_dist[1].n_races, 2);
        assert_eq!(by_dist[1].hit_rate, 1.0);
    }

    #[test]
    fn test_group_by_race() {
        let mut rows = vec![
            runner("A", 0.5, 0.5, 0.0, 1),
            runner("B", 0.5, 0.5, 0.0, 2),
        ];
        let mut c = runner("C", 1.0, 1.0, 0.0, 1);
        c.key = RaceKey::new(None, 2);
        rows.insert(1, c);
        let races = group_by_race(&rows);
        assert_eq!(races.len(), 2);
        assert_eq!(races[0].len(), 2);
        assert_eq!(races[0][1].horse, "B");
    }
}
