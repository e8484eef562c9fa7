//! Kelly criterion stake sizing.

use crate::config::BettingConfig;
use crate::types::RunnerEstimate;

/// Calculate the full Kelly fraction.
///
/// Kelly fraction = (p * b - q) / b
/// where:
///   p = probability of winning
///   b = net odds (decimal odds - 1)
///   q = 1 - p
///
/// Returns 0 when `b <= 0`. Can be negative when the edge is negative.
pub fn calculate_kelly_fraction(probability: f64, decimal_odds: f64) -> f64 {
    let b = decimal_odds - 1.0;
    if b <= 0.0 {
        return 0.0;
    }
    let q = 1.0 - probability;
    (probability * b - q) / b
}

/// Stake for one runner as a fraction of bankroll.
///
/// Zero at or below the confidence threshold, otherwise the Kelly fraction at
/// the market-implied odds clamped to `[0, max_stake]`.
pub fn kelly_stake(estimate: &RunnerEstimate, config: &BettingConfig) -> f64 {
    if estimate.p_posterior <= config.confidence_threshold {
        return 0.0;
    }
    if estimate.p_market <= 0.0 {
        return 0.0;
    }
    let kelly = calculate_kelly_fraction(estimate.p_posterior, estimate.decimal_odds());
    kelly.clamp(0.0, config.max_stake)
}

/// Stakes for every runner of a race, in the same order.
pub fn race_stakes(estimates: &[RunnerEstimate], config: &BettingConfig) -> Vec<f64> {
    estimates.iter().map(|e| kelly_stake(e, config)).collect()
}
