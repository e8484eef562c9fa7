//! Rule-based prior and the market/prior posterior combiner.
//!
//! The posterior is the normalized geometric mean of the normalized market
//! probabilities and the normalized priors. Nothing here is fitted to data.

use tracing::debug;

use crate::error::ModelError;
use crate::types::{MarketSnapshot, Race, Runner, RunnerEstimate, ROUTE_DISTANCE_M};

/// Market probability used when a runner has no usable snapshot.
pub const DEFAULT_MARKET_PROB: f64 = 0.08;

/// Lower bound on the raw prior.
pub const MIN_PRIOR: f64 = 0.01;

/// Weight (kg) at which no weight adjustment applies.
const BASELINE_WEIGHT_KG: f64 = 55.0;
const BASE_PRIOR: f64 = 0.20;
const RATING_COEF: f64 = 0.006;
const ROUTE_WEIGHT_COEF: f64 = 0.010;
const SPRINT_WEIGHT_COEF: f64 = 0.006;
const ROUTE_THREE_YEAR_OLD_BONUS: f64 = 0.02;

/// Un-normalized prior win likelihood for a runner at a given distance.
pub fn prior(runner: &Runner, distance_m: u32) -> f64 {
    let is_route = distance_m >= ROUTE_DISTANCE_M;

    let mut base = BASE_PRIOR + RATING_COEF * runner.rating as f64;

    // Heavier runners are penalized, more so over a route
    let weight_coef = if is_route {
        ROUTE_WEIGHT_COEF
    } else {
        SPRINT_WEIGHT_COEF
    };
    base -= weight_coef * (runner.weight_kg - BASELINE_WEIGHT_KG);

    if runner.age == 3 && is_route {
        base += ROUTE_THREE_YEAR_OLD_BONUS;
    }

    base.max(MIN_PRIOR)
}

/// Rescale non-negative weights to sum to 1.
///
/// Falls back to a uniform distribution when the weights sum to zero.
/// Order and length are preserved; an empty input gives an empty output.
pub fn normalize(weights: &[f64]) -> Vec<f64> {
    if weights.is_empty() {
        return Vec::new();
    }
    let sum: f64 = weights.iter().sum();
    if sum > 0.0 {
        weights.iter().map(|w| w / sum).collect()
    } else {
        vec![1.0 / weights.len() as f64; weights.len()]
    }
}

/// Combiner settings.
#[derive(Debug, Clone, Copy)]
pub struct Combiner {
    pub market_source: MarketSnapshot,
    pub default_market_prob: f64,
}

impl Default for Combiner {
    fn default() -> Self {
        Self {
            market_source: MarketSnapshot::default(),
            default_market_prob: DEFAULT_MARKET_PROB,
        }
    }
}

impl Combiner {
    pub fn new(market_source: MarketSnapshot) -> Self {
        Self {
            market_source,
            ..Default::default()
        }
    }

    /// Market probability for a runner, with the snapshot it came from.
    fn market_prob(&self, runner: &Runner) -> (f64, Option<MarketSnapshot>) {
        match runner.market.resolve(self.market_source) {
            Some((p, source)) => (p, Some(source)),
            None => {
                debug!(
                    horse = %runner.horse,
                    default = self.default_market_prob,
                    no_snapshots = runner.market.is_empty(),
                    "no market data, using default probability"
                );
                (self.default_market_prob, None)
            }
        }
    }

    /// Compute market, prior and posterior probabilities for every runner of a race.
    ///
    /// Output follows the race's runner order, one estimate per runner.
    pub fn combine(&self, race: &Race) -> Result<Vec<RunnerEstimate>, ModelError> {
        if race.runners.is_empty() {
            return Err(ModelError::EmptyRace {
                race_no: race.key.race_no,
            });
        }

        let (raw_market, sources): (Vec<f64>, Vec<Option<MarketSnapshot>>) =
            race.runners.iter().map(|r| self.market_prob(r)).unzip();
        let p_market = normalize(&raw_market);

        let raw_prior: Vec<f64> = race
            .runners
            .iter()
            .map(|r| prior(r, race.distance_m))
            .collect();
        let p_prior = normalize(&raw_prior);

        let geometric: Vec<f64> = p_market
            .iter()
            .zip(&p_prior)
            .map(|(m, p)| (m * p).sqrt())
            .collect();
        let p_posterior = normalize(&geometric);

        Ok(race
            .runners
            .iter()
            .enumerate()
            .map(|(i, runner)| RunnerEstimate {
                horse: runner.horse.clone(),
                p_market: p_market[i],
                p_prior: p_prior[i],
                p_posterior: p_posterior[i],
                market_source: sources[i],
            })
            .collect())
    }
}
