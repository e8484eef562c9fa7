//! Configuration for the combiner and backtester.

use serde::{Deserialize, Serialize};

use crate::model::DEFAULT_MARKET_PROB;
use crate::types::MarketSnapshot;

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Active market snapshot
    #[serde(default)]
    pub market_source: MarketSnapshot,
    /// Market probability for runners without any snapshot
    #[serde(default = "default_market_prob")]
    pub default_market_prob: f64,
}

fn default_market_prob() -> f64 {
    DEFAULT_MARKET_PROB
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            market_source: MarketSnapshot::default(),
            default_market_prob: default_market_prob(),
        }
    }
}

/// Betting configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BettingConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_max_stake")]
    pub max_stake: f64,
}

fn default_confidence_threshold() -> f64 {
    0.15
}

fn default_max_stake() -> f64 {
    0.10
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_stake: default_max_stake(),
        }
    }
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_n_folds")]
    pub n_folds: usize,
    #[serde(default = "default_calibration_bins")]
    pub calibration_bins: usize,
}

fn default_n_folds() -> usize {
    5
}

fn default_calibration_bins() -> usize {
    10
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            n_folds: default_n_folds(),
            calibration_bins: default_calibration_bins(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub betting: BettingConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
}

impl AppConfig {
    /// Load configuration from environment and config file
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // Add config file if exists
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables (BENTER_BETTING__MAX_STAKE, etc.)
            .add_source(
                config::Environment::with_prefix("BENTER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    /// Reject settings the combiner and stake sizer cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let p = self.model.default_market_prob;
        if !(p > 0.0 && p <= 1.0) {
            anyhow::bail!("model.default_market_prob must be in (0, 1], got {}", p);
        }
        let t = self.betting.confidence_threshold;
        if !(0.0..=1.0).contains(&t) {
            anyhow::bail!("betting.confidence_threshold must be in [0, 1], got {}", t);
        }
        let m = self.betting.max_stake;
        if !(0.0..=1.0).contains(&m) {
            anyhow::bail!("betting.max_stake must be in [0, 1], got {}", m);
        }
        if self.backtest.n_folds == 0 {
            anyhow::bail!("backtest.n_folds must be at least 1");
        }
        if self.backtest.calibration_bins == 0 {
            anyhow::bail!("backtest.calibration_bins must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.model.market_source, MarketSnapshot::Opening);
        assert!((config.model.default_market_prob - 0.08).abs() < 1e-12);
        assert!((config.betting.confidence_threshold - 0.15).abs() < 1e-12);
        assert!((config.betting.max_stake - 0.10).abs() < 1e-12);
        assert_eq!(config.backtest.n_folds, 5);
        assert_eq!(config.backtest.calibration_bins, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_field_defaults() {
        let json = r#"{"model": {"market_source": "morning"}, "betting": {"max_stake": 0.05}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.model.market_source, MarketSnapshot::Morning);
        assert!((config.model.default_market_prob - 0.08).abs() < 1e-12);
        assert!((config.betting.max_stake - 0.05).abs() < 1e-12);
        assert!((config.betting.confidence_threshold - 0.15).abs() < 1e-12);
        assert_eq!(config.backtest.n_folds, 5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.model.default_market_prob = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.betting.max_stake = -0.1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.backtest.n_folds = 0;
        assert!(config.validate().is_err());
    }
}
