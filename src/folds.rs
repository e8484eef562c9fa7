//! Walk-forward fold construction.
//!
//! Distinct ordering keys (meeting dates, or race numbers when dates are not
//! populated) are sorted and cut into contiguous groups. Each group is the
//! validation set of one fold; everything else is its training set. The
//! rule-based model never fits on the training set, it is produced for the
//! report and for callers that want it.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use tracing::warn;

use crate::error::ModelError;
use crate::types::RaceEntry;

/// Axis the folds are cut along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldAxis {
    MeetingDate,
    RaceNumber,
}

impl FoldAxis {
    /// Meeting date when every row carries one, race number otherwise.
    pub fn detect(entries: &[RaceEntry]) -> Self {
        let dated = entries
            .iter()
            .filter(|e| e.key.meeting_date.is_some())
            .count();
        if !entries.is_empty() && dated == entries.len() {
            FoldAxis::MeetingDate
        } else {
            if dated > 0 {
                warn!(
                    dated,
                    total = entries.len(),
                    "meeting date only partly populated, splitting by race number"
                );
            }
            FoldAxis::RaceNumber
        }
    }

    fn key_of(&self, entry: &RaceEntry) -> FoldKey {
        match (self, entry.key.meeting_date) {
            (FoldAxis::MeetingDate, Some(d)) => FoldKey::Date(d),
            _ => FoldKey::RaceNo(entry.key.race_no),
        }
    }
}

/// Ordering key value of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum FoldKey {
    Date(NaiveDate),
    RaceNo(u32),
}

impl fmt::Display for FoldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FoldKey::Date(d) => write!(f, "{}", d),
            FoldKey::RaceNo(n) => write!(f, "R{}", n),
        }
    }
}

/// One train/validation pair.
#[derive(Debug, Clone)]
pub struct Fold {
    /// Zero-based position of the fold in walk-forward order.
    pub index: usize,
    /// Sorted key values whose rows form the validation set.
    pub validation_keys: Vec<FoldKey>,
    pub train: Vec<RaceEntry>,
    pub validation: Vec<RaceEntry>,
}

impl Fold {
    pub fn name(&self) -> String {
        format!("Fold {}", self.index + 1)
    }

    pub fn key_range(&self) -> Option<(FoldKey, FoldKey)> {
        match (self.validation_keys.first(), self.validation_keys.last()) {
            (Some(a), Some(b)) => Some((*a, *b)),
            _ => None,
        }
    }
}

/// All folds of a run, in walk-forward order.
#[derive(Debug, Clone)]
pub struct FoldPlan {
    pub axis: FoldAxis,
    pub folds: Vec<Fold>,
}

/// Split rows into `n_folds` ordered train/validation pairs.
///
/// Groups have `len / n_folds` keys each and the last group absorbs the
/// remainder, so asking for more folds than there are keys yields empty
/// leading folds.
pub fn split(entries: &[RaceEntry], n_folds: usize) -> Result<FoldPlan, ModelError> {
    if n_folds == 0 {
        return Err(ModelError::InvalidFoldCount(n_folds));
    }

    let axis = FoldAxis::detect(entries);
    let row_keys: Vec<FoldKey> = entries.iter().map(|e| axis.key_of(e)).collect();

    let mut keys = row_keys.clone();
    keys.sort();
    keys.dedup();

    let fold_size = keys.len() / n_folds;
    let folds = (0..n_folds)
        .map(|i| {
            let start = i * fold_size;
            let end = if i < n_folds - 1 {
                start + fold_size
            } else {
                keys.len()
            };
            let group = &keys[start..end];

            let (validation, train): (Vec<_>, Vec<_>) = entries
                .iter()
                .zip(&row_keys)
                .partition(|(_, k)| group.binary_search(k).is_ok());

            Fold {
                index: i,
                validation_keys: group.to_vec(),
                train: train.into_iter().map(|(e, _)| e.clone()).collect(),
                validation: validation.into_iter().map(|(e, _)| e.clone()).collect(),
            }
        })
        .collect();

    Ok(FoldPlan { axis, folds })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketOdds, RaceKey, Runner};
    use std::collections::HashSet;

    fn entry(meeting_date: Option<NaiveDate>, race_no: u32, horse: &str) -> RaceEntry {
        RaceEntry {
            key: RaceKey::new(meeting_date, race_no),
            race_name: format!("Race {}", race_no),
            distance_m: 1400,
            runner: Runner {
                horse: horse.to_string(),
                age: 4,
                rating: 40,
                weight_kg: 55.0,
                market: MarketOdds::default(),
            },
        }
    }

    fn races(n: u32, runners_per_race: usize) -> Vec<RaceEntry> {
        (1..=n)
            .flat_map(|r| (0..runners_per_race).map(move |h| entry(None, r, &format!("H{}", h))))
            .collect()
    }

    fn distinct_races(entries: &[RaceEntry]) -> HashSet<u32> {
        entries.iter().map(|e| e.key.race_no).collect()
    }

    #[test]
    fn test_five_folds_of_twenty() {
        let entries = races(100, 3);
        let plan = split(&entries, 5).unwrap();
        assert_eq!(plan.axis, FoldAxis::RaceNumber);
        assert_eq!(plan.folds.len(), 5);
        for fold in &plan.folds {
            assert_eq!(distinct_races(&fold.validation).len(), 20);
            assert_eq!(fold.validation.len(), 60);
            assert_eq!(fold.train.len(), 240);
        }
        assert_eq!(
            plan.folds[1].key_range(),
            Some((FoldKey::RaceNo(21), FoldKey::RaceNo(40)))
        );
    }

    #[test]
    fn test_validation_disjoint_and_covering() {
        let entries = races(23, 2);
        let plan = split(&entries, 4).unwrap();

        let mut seen: HashSet<u32> = HashSet::new();
        for fold in &plan.folds {
            let vr = distinct_races(&fold.validation);
            assert!(seen.is_disjoint(&vr));
            // Training is the complement of validation
            assert!(distinct_races(&fold.train).is_disjoint(&vr));
            assert_eq!(fold.train.len() + fold.validation.len(), entries.len());
            seen.extend(vr);
        }
        assert_eq!(seen, distinct_races(&entries));

        // 23 / 4 = 5 per fold, last absorbs the remainder
        assert_eq!(distinct_races(&plan.folds[3].validation).len(), 8);
    }

    #[test]
    fn test_more_folds_than_keys() {
        let entries = races(3, 2);
        let plan = split(&entries, 5).unwrap();
        assert_eq!(plan.folds.len(), 5);
        for fold in &plan.folds[..4] {
            assert!(fold.validation.is_empty());
            assert_eq!(fold.train.len(), 6);
        }
        assert_eq!(plan.folds[4].validation.len(), 6);
        assert!(plan.folds[4].key_range().is_some());
        assert!(plan.folds[0].key_range().is_none());
    }

    #[test]
    fn test_split_by_meeting_date() {
        let d = |day| NaiveDate::from_ymd_opt(2025, 8, day);
        let entries = vec![
            entry(d(3), 1, "A"),
            entry(d(1), 1, "B"),
            entry(d(2), 1, "C"),
            entry(d(1), 2, "D"),
        ];
        let plan = split(&entries, 3).unwrap();
        assert_eq!(plan.axis, FoldAxis::MeetingDate);
        let horses: Vec<Vec<&str>> = plan
            .folds
            .iter()
            .map(|f| f.validation.iter().map(|e| e.runner.horse.as_str()).collect())
            .collect();
        assert_eq!(horses, vec![vec!["B", "D"], vec!["C"], vec!["A"]]);
    }

    #[test]
    fn test_partial_dates_fall_back_to_race_number() {
        let entries = vec![
            entry(NaiveDate::from_ymd_opt(2025, 8, 1), 1, "A"),
            entry(None, 2, "B"),
        ];
        assert_eq!(FoldAxis::detect(&entries), FoldAxis::RaceNumber);
    }

    #[test]
    fn test_zero_folds_is_error() {
        assert!(matches!(
            split(&races(3, 1), 0),
            Err(ModelError::InvalidFoldCount(0))
        ));
    }

    #[test]
    fn test_empty_dataset() {
        let plan = split(&[], 3).unwrap();
        assert_eq!(plan.folds.len(), 3);
        assert!(plan.folds.iter().all(|f| f.validation.is_empty() && f.train.is_empty()));
    }
}
