//! Race, runner and result types shared by the combiner and the backtester.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ModelError;

/// Finishing position assigned to runners absent from the results.
pub const UNPLACED_POSITION: u32 = 99;

/// Distance (meters) from which a race counts as a route race.
pub const ROUTE_DISTANCE_M: u32 = 1600;

/// Market snapshot a probability was captured at.
///
/// Chronological order: night (eve of the meeting), morning, opening (on course).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketSnapshot {
    Night,
    Morning,
    #[default]
    Opening,
}

impl MarketSnapshot {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "night" | "p_night" => Some(MarketSnapshot::Night),
            "morning" | "p_morning" => Some(MarketSnapshot::Morning),
            "opening" | "p_opening" => Some(MarketSnapshot::Opening),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MarketSnapshot::Night => "night",
            MarketSnapshot::Morning => "morning",
            MarketSnapshot::Opening => "opening",
        }
    }

    /// Feature table column holding this snapshot.
    pub fn column(&self) -> &'static str {
        match self {
            MarketSnapshot::Night => "p_night",
            MarketSnapshot::Morning => "p_morning",
            MarketSnapshot::Opening => "p_opening",
        }
    }

    /// Snapshots to try, in order, when `self` is the requested source.
    ///
    /// The requested snapshot first, then morning, then night.
    pub fn fallback_chain(&self) -> Vec<MarketSnapshot> {
        let mut chain = vec![*self];
        for s in [MarketSnapshot::Morning, MarketSnapshot::Night] {
            if !chain.contains(&s) {
                chain.push(s);
            }
        }
        chain
    }
}

impl fmt::Display for MarketSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Market-implied win probabilities observed at each snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketOdds {
    pub night: Option<f64>,
    pub morning: Option<f64>,
    pub opening: Option<f64>,
}

impl MarketOdds {
    /// Probability at a snapshot. Non-positive or non-finite values count as absent.
    pub fn get(&self, snapshot: MarketSnapshot) -> Option<f64> {
        let value = match snapshot {
            MarketSnapshot::Night => self.night,
            MarketSnapshot::Morning => self.morning,
            MarketSnapshot::Opening => self.opening,
        };
        value.filter(|p| p.is_finite() && *p > 0.0)
    }

    /// Walk the fallback chain from `requested`.
    ///
    /// Returns the probability and the snapshot it came from, or `None`
    /// when every snapshot is absent.
    pub fn resolve(&self, requested: MarketSnapshot) -> Option<(f64, MarketSnapshot)> {
        requested
            .fallback_chain()
            .into_iter()
            .find_map(|s| self.get(s).map(|p| (p, s)))
    }

    pub fn is_empty(&self) -> bool {
        self.night.is_none() && self.morning.is_none() && self.opening.is_none()
    }
}

/// A single horse entered in a race, with validated attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runner {
    pub horse: String,
    pub age: u32,
    pub rating: i32,
    pub weight_kg: f64,
    #[serde(default)]
    pub market: MarketOdds,
}

impl Runner {
    /// Key used to match the runner against result placings.
    pub fn match_key(&self) -> String {
        normalize_horse_name(&self.horse)
    }
}

/// Identifies a race: race number within an optional meeting date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RaceKey {
    pub meeting_date: Option<NaiveDate>,
    pub race_no: u32,
}

impl RaceKey {
    pub fn new(meeting_date: Option<NaiveDate>, race_no: u32) -> Self {
        Self {
            meeting_date,
            race_no,
        }
    }
}

impl fmt::Display for RaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.meeting_date {
            Some(d) => write!(f, "{} R{}", d, self.race_no),
            None => write!(f, "R{}", self.race_no),
        }
    }
}

/// One row of the feature table: a runner in a race.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceEntry {
    pub key: RaceKey,
    pub race_name: String,
    pub distance_m: u32,
    pub runner: Runner,
}

/// A race with its runners in stored order.
#[derive(Debug, Clone, PartialEq)]
pub struct Race {
    pub key: RaceKey,
    pub race_name: String,
    pub distance_m: u32,
    pub runners: Vec<Runner>,
}

impl Race {
    pub fn is_route(&self) -> bool {
        self.distance_m >= ROUTE_DISTANCE_M
    }

    /// Group table rows into races ordered by key.
    ///
    /// Runners keep the order they appear in `entries`. Race name and distance
    /// come from the first row of each race.
    pub fn group<'a, I>(entries: I) -> Vec<Race>
    where
        I: IntoIterator<Item = &'a RaceEntry>,
    {
        let mut races: BTreeMap<RaceKey, Race> = BTreeMap::new();
        for entry in entries {
            races
                .entry(entry.key)
                .or_insert_with(|| Race {
                    key: entry.key,
                    race_name: entry.race_name.clone(),
                    distance_m: entry.distance_m,
                    runners: Vec::new(),
                })
                .runners
                .push(entry.runner.clone());
        }
        races.into_values().collect()
    }
}

/// Raw feature-table row before validation.
///
/// Every numeric attribute is optional here; [`RaceEntry::try_from`] rejects
/// rows that cannot feed the prior.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub race_no: u32,
    #[serde(default)]
    pub meeting_date: Option<NaiveDate>,
    #[serde(default)]
    pub race_name: String,
    pub dist_m: Option<i64>,
    pub horse: String,
    pub age: Option<i64>,
    pub rating: Option<i64>,
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub p_night: Option<f64>,
    #[serde(default)]
    pub p_morning: Option<f64>,
    #[serde(default)]
    pub p_opening: Option<f64>,
}

impl TryFrom<FeatureRow> for RaceEntry {
    type Error = ModelError;

    fn try_from(row: FeatureRow) -> Result<Self, Self::Error> {
        let missing = |field: &'static str| ModelError::MissingField {
            race_no: row.race_no,
            horse: row.horse.clone(),
            field,
        };

        let distance_m = row
            .dist_m
            .and_then(|d| u32::try_from(d).ok())
            .ok_or_else(|| missing("dist_m"))?;
        let age = row
            .age
            .and_then(|a| u32::try_from(a).ok())
            .ok_or_else(|| missing("age"))?;
        let rating = row
            .rating
            .and_then(|r| i32::try_from(r).ok())
            .ok_or_else(|| missing("rating"))?;
        let weight_kg = row
            .weight_kg
            .filter(|w| w.is_finite())
            .ok_or_else(|| missing("weight_kg"))?;

        Ok(RaceEntry {
            key: RaceKey::new(row.meeting_date, row.race_no),
            race_name: row.race_name,
            distance_m,
            runner: Runner {
                horse: row.horse,
                age,
                rating,
                weight_kg,
                market: MarketOdds {
                    night: row.p_night,
                    morning: row.p_morning,
                    opening: row.p_opening,
                },
            },
        })
    }
}

/// A finishing placing as reported by the results parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placing {
    pub pos: u32,
    pub horse: String,
}

/// Results for one race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceResult {
    pub race_no: u32,
    #[serde(default)]
    pub meeting_date: Option<NaiveDate>,
    #[serde(default)]
    pub placings: Vec<Placing>,
}

/// Normalize a horse name for matching between datasets (lowercase, alphanumeric only).
pub fn normalize_horse_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Probability triple for one runner in one race.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunnerEstimate {
    pub horse: String,
    pub p_market: f64,
    pub p_prior: f64,
    pub p_posterior: f64,
    /// Snapshot the market probability came from; `None` when the default was used.
    pub market_source: Option<MarketSnapshot>,
}

impl RunnerEstimate {
    /// Decimal odds implied by the normalized market probability.
    pub fn decimal_odds(&self) -> f64 {
        1.0 / self.p_market
    }
}

/// A runner after combining, staking and position attachment.
///
/// One row of the backtest output table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedRunner {
    pub fold: usize,
    pub key: RaceKey,
    pub race_name: String,
    pub distance_m: u32,
    pub horse: String,
    pub age: u32,
    pub rating: i32,
    pub weight_kg: f64,
    pub p_market: f64,
    pub p_prior: f64,
    pub p_posterior: f64,
    pub kelly_stake: f64,
    pub position: u32,
}

impl EvaluatedRunner {
    pub fn is_winner(&self) -> bool {
        self.position == 1
    }
}
