//! Probability calibration report.
//!
//! Buckets runners into equal-width posterior bins over [0, 1] and compares the
//! mean prediction in each bin with the observed win rate. The report is
//! diagnostic only; it never feeds back into the model.

use serde::Serialize;

use crate::types::EvaluatedRunner;

/// Equal-width bins over [0, 1].
#[derive(Debug, Clone)]
pub struct Binning {
    pub n_bins: usize,
    pub bin_edges: Vec<f64>,
}

impl Binning {
    pub fn new(n_bins: usize) -> Self {
        let n_bins = n_bins.max(1);
        let bin_edges: Vec<f64> = (0..=n_bins).map(|i| i as f64 / n_bins as f64).collect();
        Self { n_bins, bin_edges }
    }

    /// Find which bin a probability falls into.
    pub fn find_bin(&self, prob: f64) -> usize {
        for i in 0..self.n_bins {
            if prob >= self.bin_edges[i] && prob < self.bin_edges[i + 1] {
                return i;
            }
        }
        // prob == 1.0 (or above)
        if prob >= 1.0 {
            self.n_bins - 1
        } else {
            0
        }
    }
}

/// One non-empty calibration bin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationBin {
    pub bin: usize,
    pub lower: f64,
    pub upper: f64,
    pub mean_predicted: f64,
    pub observed_rate: f64,
    pub count: usize,
}

/// Calibration table plus its population-weighted gap.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalibrationReport {
    pub bins: Vec<CalibrationBin>,
    /// Population-weighted mean of |mean_predicted - observed_rate|.
    pub expected_calibration_error: f64,
}

impl CalibrationReport {
    /// Build the report from evaluated runners. Empty bins are omitted.
    pub fn build(runners: &[EvaluatedRunner], n_bins: usize) -> Self {
        let binning = Binning::new(n_bins);
        // (sum of predictions, winners, count) per bin
        let mut acc = vec![(0.0f64, 0usize, 0usize); binning.n_bins];
        for r in runners {
            let slot = &mut acc[binning.find_bin(r.p_posterior)];
            slot.0 += r.p_posterior;
            if r.is_winner() {
                slot.1 += 1;
            }
            slot.2 += 1;
        }

        let bins: Vec<CalibrationBin> = acc
            .into_iter()
            .enumerate()
            .filter(|(_, (_, _, count))| *count > 0)
            .map(|(i, (sum, wins, count))| CalibrationBin {
                bin: i,
                lower: binning.bin_edges[i],
                upper: binning.bin_edges[i + 1],
                mean_predicted: sum / count as f64,
                observed_rate: wins as f64 / count as f64,
                count,
            })
            .collect();

        let total: usize = bins.iter().map(|b| b.count).sum();
        let expected_calibration_error = if total == 0 {
            0.0
        } else {
            bins.iter()
                .map(|b| b.count as f64 * (b.mean_predicted - b.observed_rate).abs())
                .sum::<f64>()
                / total as f64
        };

        Self {
            bins,
            expected_calibration_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RaceKey;

    fn runner(p_posterior: f64, position: u32) -> EvaluatedRunner {
        EvaluatedRunner {
            fold: 0,
            key: RaceKey::new(None, 1),
            race_name: String::new(),
            distance_m: 1200,
            horse: "A".to_string(),
            age: 4,
            rating: 40,
            weight_kg: 55.0,
            p_market: p_posterior,
            p_prior: p_posterior,
            p_posterior,
            kelly_stake: 0.0,
            position,
        }
    }

    #[test]
    fn test_find_bin() {
        let b = Binning::new(10);
        assert_eq!(b.find_bin(0.0), 0);
        assert_eq!(b.find_bin(0.05), 0);
        assert_eq!(b.find_bin(0.15), 1);
        assert_eq!(b.find_bin(0.95), 9);
        assert_eq!(b.find_bin(1.0), 9);
    }

    #[test]
    fn test_report_omits_empty_bins() {
        let runners = vec![
            runner(0.05, 1),
            runner(0.07, 2),
            runner(0.08, 3),
            runner(0.09, 4),
            runner(0.55, 1),
        ];
        let report = CalibrationReport::build(&runners, 10);
        assert_eq!(report.bins.len(), 2);

        let low = &report.bins[0];
        assert_eq!(low.bin, 0);
        assert_eq!(low.count, 4);
        assert!((low.mean_predicted - 0.0725).abs() < 1e-12);
        assert!((low.observed_rate - 0.25).abs() < 1e-12);

        let high = &report.bins[1];
        assert_eq!(high.bin, 5);
        assert!((high.lower - 0.5).abs() < 1e-12);
        assert!((high.upper - 0.6).abs() < 1e-12);
        assert_eq!(high.observed_rate, 1.0);
    }

    #[test]
    fn test_expected_calibration_error() {
        // Bin 0: predicted 0.0725, observed 0.25 (4 runners); bin 5: 0.55 vs 1.0 (1 runner)
        let runners = vec![
            runner(0.05, 1),
            runner(0.07, 2),
            runner(0.08, 3),
            runner(0.09, 4),
            runner(0.55, 1),
        ];
        let report = CalibrationReport::build(&runners, 10);
        let expected = (4.0 * (0.25 - 0.0725) + 1.0 * 0.45) / 5.0;
        assert!((report.expected_calibration_error - expected).abs() < 1e-12);
    }

    #[test]
    fn test_empty_report() {
        let report = CalibrationReport::build(&[], 10);
        assert!(report.bins.is_empty());
        assert_eq!(report.expected_calibration_error, 0.0);
    }
}
