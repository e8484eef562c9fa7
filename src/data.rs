//! File boundary: feature tables, results, and report tables.
//!
//! Feature tables and output tables are Parquet or CSV, chosen by file
//! extension. Results are the JSON emitted by the results parser.

use anyhow::Context;
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::path::Path;
use tracing::{info, warn};

use crate::calibration::CalibrationReport;
use crate::error::ModelError;
use crate::metrics::RunMetrics;
use crate::types::{
    EvaluatedRunner, FeatureRow, MarketSnapshot, Placing, RaceEntry, RaceKey, RaceResult,
};

/// Tabular file format, by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Parquet,
    Csv,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "parquet" | "pq" => Some(TableFormat::Parquet),
            "csv" => Some(TableFormat::Csv),
            _ => None,
        }
    }
}

fn read_table(path: &Path) -> Result<DataFrame, ModelError> {
    let format = TableFormat::from_path(path).ok_or_else(|| {
        ModelError::malformed(path, "unsupported table extension (expected .parquet or .csv)")
    })?;
    let result = match format {
        TableFormat::Parquet => LazyFrame::scan_parquet(path, Default::default())
            .and_then(|lf| lf.collect()),
        TableFormat::Csv => CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .and_then(|reader| reader.finish()),
    };
    result.map_err(|e| ModelError::malformed(path, e))
}

/// Column access with type coercion, reporting failures against the file path.
struct Columns<'a> {
    df: &'a DataFrame,
    path: &'a Path,
}

impl<'a> Columns<'a> {
    fn has(&self, name: &str) -> bool {
        self.df.column(name).is_ok()
    }

    fn cast(&self, name: &str, dtype: &DataType) -> Result<Option<Column>, ModelError> {
        match self.df.column(name) {
            Ok(col) => col
                .cast(dtype)
                .map(Some)
                .map_err(|e| ModelError::malformed(self.path, format!("column '{}': {}", name, e))),
            Err(_) => Ok(None),
        }
    }

    fn require<T>(&self, name: &str, values: Option<T>) -> Result<T, ModelError> {
        values.ok_or_else(|| ModelError::malformed(self.path, format!("missing column '{}'", name)))
    }

    fn i64s(&self, name: &str) -> Result<Option<Vec<Option<i64>>>, ModelError> {
        let Some(col) = self.cast(name, &DataType::Int64)? else {
            return Ok(None);
        };
        let ca = col.i64().map_err(|e| ModelError::malformed(self.path, e))?;
        Ok(Some(ca.into_iter().collect()))
    }

    fn f64s(&self, name: &str) -> Result<Option<Vec<Option<f64>>>, ModelError> {
        let Some(col) = self.cast(name, &DataType::Float64)? else {
            return Ok(None);
        };
        let ca = col.f64().map_err(|e| ModelError::malformed(self.path, e))?;
        Ok(Some(ca.into_iter().map(|v| v.filter(|x| !x.is_nan())).collect()))
    }

    fn strings(&self, name: &str) -> Result<Option<Vec<Option<String>>>, ModelError> {
        let Some(col) = self.cast(name, &DataType::String)? else {
            return Ok(None);
        };
        let ca = col.str().map_err(|e| ModelError::malformed(self.path, e))?;
        Ok(Some(ca.into_iter().map(|v| v.map(str::to_string)).collect()))
    }

    fn dates(&self, name: &str) -> Result<Option<Vec<Option<NaiveDate>>>, ModelError> {
        let Some(values) = self.strings(name)? else {
            return Ok(None);
        };
        values
            .into_iter()
            .map(|v| match v.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                // Datetimes cast to string keep the date in the first 10 chars
                Some(s) => NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d")
                    .map(Some)
                    .map_err(|e| {
                        ModelError::malformed(self.path, format!("{} '{}': {}", name, s, e))
                    }),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

fn none_column<T: Clone>(len: usize) -> Vec<Option<T>> {
    vec![None; len]
}

fn race_no_from(value: Option<i64>, path: &Path, row: usize) -> Result<u32, ModelError> {
    value
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| ModelError::malformed(path, format!("row {}: invalid race_no", row)))
}

/// Feature table after validation.
#[derive(Debug, Default)]
pub struct FeatureTable {
    pub entries: Vec<RaceEntry>,
    /// Runners excluded because a required attribute is missing.
    pub rejected: Vec<ModelError>,
}

/// Parse raw feature rows from a table file.
pub fn load_feature_rows<P: AsRef<Path>>(path: P) -> Result<Vec<FeatureRow>, ModelError> {
    let path = path.as_ref();
    let df = read_table(path)?;
    let cols = Columns { df: &df, path };
    let n = df.height();

    for required in ["race_no", "horse", "dist_m", "age", "rating", "weight_kg"] {
        if !cols.has(required) {
            return Err(ModelError::malformed(path, format!("missing column '{}'", required)));
        }
    }

    let race_nos = cols.require("race_no", cols.i64s("race_no")?)?;
    let horses = cols.require("horse", cols.strings("horse")?)?;
    let dists = cols.require("dist_m", cols.i64s("dist_m")?)?;
    let ages = cols.require("age", cols.i64s("age")?)?;
    let ratings = cols.require("rating", cols.i64s("rating")?)?;
    let weights = cols.require("weight_kg", cols.f64s("weight_kg")?)?;
    let race_names = cols.strings("race_name")?.unwrap_or_else(|| none_column(n));
    let dates = cols.dates("meeting_date")?.unwrap_or_else(|| none_column(n));
    let snapshot = |s: MarketSnapshot| -> Result<Vec<Option<f64>>, ModelError> {
        Ok(cols.f64s(s.column())?.unwrap_or_else(|| none_column(n)))
    };
    let nights = snapshot(MarketSnapshot::Night)?;
    let mornings = snapshot(MarketSnapshot::Morning)?;
    let openings = snapshot(MarketSnapshot::Opening)?;

    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        let horse = horses[i]
            .clone()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| ModelError::malformed(path, format!("row {}: missing horse name", i)))?;
        rows.push(FeatureRow {
            race_no: race_no_from(race_nos[i], path, i)?,
            meeting_date: dates[i],
            race_name: race_names[i].clone().unwrap_or_default(),
            dist_m: dists[i],
            horse,
            age: ages[i],
            rating: ratings[i],
            weight_kg: weights[i],
            p_night: nights[i],
            p_morning: mornings[i],
            p_opening: openings[i],
        });
    }
    Ok(rows)
}

/// Load and validate the feature table.
///
/// Runners with missing attributes are excluded and reported in
/// [`FeatureTable::rejected`]; an unreadable file is fatal.
pub fn load_features<P: AsRef<Path>>(path: P) -> Result<FeatureTable, ModelError> {
    let path = path.as_ref();
    let rows = load_feature_rows(path)?;

    let mut table = FeatureTable::default();
    for row in rows {
        match RaceEntry::try_from(row) {
            Ok(entry) => table.entries.push(entry),
            Err(e) if e.is_recoverable() => {
                warn!("excluding runner: {}", e);
                table.rejected.push(e);
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        path = %path.display(),
        runners = table.entries.len(),
        rejected = table.rejected.len(),
        "feature table loaded"
    );
    Ok(table)
}

/// Finishing positions by race.
#[derive(Debug, Clone, Default)]
pub struct ResultBook {
    races: HashMap<RaceKey, Vec<Placing>>,
}

impl ResultBook {
    pub fn new(results: Vec<RaceResult>) -> Self {
        let mut races: HashMap<RaceKey, Vec<Placing>> = HashMap::new();
        for r in results {
            races
                .entry(RaceKey::new(r.meeting_date, r.race_no))
                .or_default()
                .extend(r.placings);
        }
        Self { races }
    }

    /// Record a race's placings are read from.
    ///
    /// Exact `(meeting_date, race_no)` first. A dated race then falls back to
    /// an undated record, and an undated race to the earliest dated record
    /// with the same race number. The second value counts the candidates the
    /// fallback chose among.
    fn lookup(&self, key: &RaceKey) -> Option<(RaceKey, usize)> {
        if self.races.contains_key(key) {
            return Some((*key, 1));
        }
        match key.meeting_date {
            Some(_) => {
                let undated = RaceKey::new(None, key.race_no);
                self.races.contains_key(&undated).then_some((undated, 1))
            }
            None => {
                let mut dated: Vec<RaceKey> = self
                    .races
                    .keys()
                    .filter(|k| k.race_no == key.race_no && k.meeting_date.is_some())
                    .copied()
                    .collect();
                dated.sort();
                dated.first().map(|k| (*k, dated.len()))
            }
        }
    }

    /// Key of the result record matched to a race, if any.
    pub fn resolve(&self, key: &RaceKey) -> Option<RaceKey> {
        self.lookup(key).map(|(k, _)| k)
    }

    /// Placings for a race, following the fallbacks of [`ResultBook::resolve`].
    pub fn placings(&self, key: &RaceKey) -> &[Placing] {
        match self.lookup(key) {
            Some((found, candidates)) => {
                if candidates > 1 {
                    warn!(
                        race = %key,
                        candidates,
                        using = %found,
                        "undated race matches several dated result records"
                    );
                }
                self.races.get(&found).map(Vec::as_slice).unwrap_or(&[])
            }
            None => &[],
        }
    }

    /// Result records not in `used`, in key order.
    pub fn unused(&self, used: &HashSet<RaceKey>) -> Vec<(RaceKey, &[Placing])> {
        let mut records: Vec<(RaceKey, &[Placing])> = self
            .races
            .iter()
            .filter(|(k, _)| !used.contains(*k))
            .map(|(k, v)| (*k, v.as_slice()))
            .collect();
        records.sort_by_key(|(k, _)| *k);
        records
    }

    pub fn len(&self) -> usize {
        self.races.len()
    }

    pub fn is_empty(&self) -> bool {
        self.races.is_empty()
    }
}

/// Load the results JSON.
pub fn load_results<P: AsRef<Path>>(path: P) -> Result<ResultBook, ModelError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| ModelError::malformed(path, e))?;
    let results: Vec<RaceResult> =
        serde_json::from_str(&content).map_err(|e| ModelError::malformed(path, e))?;
    info!(path = %path.display(), races = results.len(), "results loaded");
    Ok(ResultBook::new(results))
}

fn write_table(df: &mut DataFrame, path: &Path) -> anyhow::Result<()> {
    let format = TableFormat::from_path(path).unwrap_or(TableFormat::Csv);
    let mut file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    match format {
        TableFormat::Parquet => {
            ParquetWriter::new(&mut file).finish(df)?;
        }
        TableFormat::Csv => {
            CsvWriter::new(&mut file).include_header(true).finish(df)?;
        }
    }
    Ok(())
}

/// Write the per-runner evaluation table.
pub fn write_runner_table<P: AsRef<Path>>(rows: &[EvaluatedRunner], path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    let mut df = df!(
        "fold" => rows.iter().map(|r| r.fold as i64).collect::<Vec<_>>(),
        "meeting_date" => rows.iter().map(|r| r.key.meeting_date.map(|d| d.to_string())).collect::<Vec<_>>(),
        "race_no" => rows.iter().map(|r| r.key.race_no as i64).collect::<Vec<_>>(),
        "race_name" => rows.iter().map(|r| r.race_name.clone()).collect::<Vec<_>>(),
        "dist_m" => rows.iter().map(|r| r.distance_m as i64).collect::<Vec<_>>(),
        "horse" => rows.iter().map(|r| r.horse.clone()).collect::<Vec<_>>(),
        "age" => rows.iter().map(|r| r.age as i64).collect::<Vec<_>>(),
        "rating" => rows.iter().map(|r| r.rating as i64).collect::<Vec<_>>(),
        "weight_kg" => rows.iter().map(|r| r.weight_kg).collect::<Vec<_>>(),
        "p_market" => rows.iter().map(|r| r.p_market).collect::<Vec<_>>(),
        "p_prior" => rows.iter().map(|r| r.p_prior).collect::<Vec<_>>(),
        "p_posterior" => rows.iter().map(|r| r.p_posterior).collect::<Vec<_>>(),
        "kelly_stake" => rows.iter().map(|r| r.kelly_stake).collect::<Vec<_>>(),
        "pos" => rows.iter().map(|r| r.position as i64).collect::<Vec<_>>()
    )?;
    write_table(&mut df, path)?;
    info!(path = %path.display(), rows = rows.len(), "runner table written");
    Ok(())
}

/// Read a per-runner table written by [`write_runner_table`].
///
/// `fold` and `kelly_stake` default to 0 when absent, so plain replay
/// tables without stakes can be re-scored.
pub fn read_runner_table<P: AsRef<Path>>(path: P) -> Result<Vec<EvaluatedRunner>, ModelError> {
    let path = path.as_ref();
    let df = read_table(path)?;
    let cols = Columns { df: &df, path };
    let n = df.height();

    let folds = cols.i64s("fold")?.unwrap_or_else(|| vec![Some(0); n]);
    let dates = cols.dates("meeting_date")?.unwrap_or_else(|| none_column(n));
    let race_nos = cols.require("race_no", cols.i64s("race_no")?)?;
    let race_names = cols.strings("race_name")?.unwrap_or_else(|| none_column(n));
    let dists = cols.require("dist_m", cols.i64s("dist_m")?)?;
    let horses = cols.require("horse", cols.strings("horse")?)?;
    let ages = cols.i64s("age")?.unwrap_or_else(|| none_column(n));
    let ratings = cols.i64s("rating")?.unwrap_or_else(|| none_column(n));
    let weights = cols.f64s("weight_kg")?.unwrap_or_else(|| none_column(n));
    let p_market = cols.require("p_market", cols.f64s("p_market")?)?;
    let p_prior = cols.f64s("p_prior")?.unwrap_or_else(|| none_column(n));
    let p_posterior = cols.require("p_posterior", cols.f64s("p_posterior")?)?;
    let stakes = cols.f64s("kelly_stake")?.unwrap_or_else(|| vec![Some(0.0); n]);
    let positions = cols.require("pos", cols.i64s("pos")?)?;

    let bad = |i: usize, what: &str| ModelError::malformed(path, format!("row {}: invalid {}", i, what));

    (0..n)
        .map(|i| -> Result<EvaluatedRunner, ModelError> {
            Ok(EvaluatedRunner {
                fold: folds[i].and_then(|f| usize::try_from(f).ok()).unwrap_or(0),
                key: RaceKey::new(dates[i], race_no_from(race_nos[i], path, i)?),
                race_name: race_names[i].clone().unwrap_or_default(),
                distance_m: dists[i]
                    .and_then(|d| u32::try_from(d).ok())
                    .ok_or_else(|| bad(i, "dist_m"))?,
                horse: horses[i].clone().ok_or_else(|| bad(i, "horse"))?,
                age: ages[i].and_then(|a| u32::try_from(a).ok()).unwrap_or(0),
                rating: ratings[i].and_then(|r| i32::try_from(r).ok()).unwrap_or(0),
                weight_kg: weights[i].unwrap_or(0.0),
                p_market: p_market[i].ok_or_else(|| bad(i, "p_market"))?,
                p_prior: p_prior[i].unwrap_or(0.0),
                p_posterior: p_posterior[i].ok_or_else(|| bad(i, "p_posterior"))?,
                kelly_stake: stakes[i].unwrap_or(0.0),
                position: positions[i]
                    .and_then(|p| u32::try_from(p).ok())
                    .ok_or_else(|| bad(i, "pos"))?,
            })
        })
        .collect()
}

/// Write per-fold metrics, one row per fold.
pub fn write_fold_summary<P: AsRef<Path>>(folds: &[(String, RunMetrics)], path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    let mut df = df!(
        "fold" => folds.iter().map(|(name, _)| name.clone()).collect::<Vec<_>>(),
        "n_races" => folds.iter().map(|(_, m)| m.n_races as i64).collect::<Vec<_>>(),
        "logloss" => folds.iter().map(|(_, m)| m.logloss).collect::<Vec<_>>(),
        "hit_rate" => folds.iter().map(|(_, m)| m.hit_rate).collect::<Vec<_>>(),
        "roi" => folds.iter().map(|(_, m)| m.roi).collect::<Vec<_>>(),
        "total_staked" => folds.iter().map(|(_, m)| m.total_staked).collect::<Vec<_>>(),
        "net_return" => folds.iter().map(|(_, m)| m.net_return).collect::<Vec<_>>(),
        "max_drawdown" => folds.iter().map(|(_, m)| m.max_drawdown).collect::<Vec<_>>()
    )?;
    write_table(&mut df, path)?;
    info!(path = %path.display(), "fold summary written");
    Ok(())
}

/// Write the calibration table.
pub fn write_calibration<P: AsRef<Path>>(report: &CalibrationReport, path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    let bins = &report.bins;
    let mut df = df!(
        "bin" => bins.iter().map(|b| b.bin as i64).collect::<Vec<_>>(),
        "lower" => bins.iter().map(|b| b.lower).collect::<Vec<_>>(),
        "upper" => bins.iter().map(|b| b.upper).collect::<Vec<_>>(),
        "mean_predicted" => bins.iter().map(|b| b.mean_predicted).collect::<Vec<_>>(),
        "observed_rate" => bins.iter().map(|b| b.observed_rate).collect::<Vec<_>>(),
        "count" => bins.iter().map(|b| b.count as i64).collect::<Vec<_>>()
    )?;
    write_table(&mut df, path)?;
    info!(path = %path.display(), "calibration table written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FEATURES_CSV: &str = "\
race_no,race_name,dist_m,horse,age,rating,weight_kg,p_night,p_morning,p_opening,meeting_date
1,Sprint Plate,1200,Star Gazer,4,40,56.0,0.3,0.35,0.4,2025-08-27
1,Sprint Plate,1200,Night Owl,5,35,54.5,,,,2025-08-27
1,Sprint Plate,1200,No Rating,5,,54.5,0.2,,,2025-08-27
2,Route Cup,2000,Desert Wind,3,50,55.0,,0.5,,2025-08-27
";

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_features_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "features.csv", FEATURES_CSV);

        let table = load_features(&path).unwrap();
        assert_eq!(table.entries.len(), 3);
        assert_eq!(table.rejected.len(), 1);
        assert!(matches!(
            &table.rejected[0],
            ModelError::MissingField { field: "rating", .. }
        ));

        let star = &table.entries[0];
        assert_eq!(star.key.race_no, 1);
        assert_eq!(star.key.meeting_date, NaiveDate::from_ymd_opt(2025, 8, 27));
        assert_eq!(star.distance_m, 1200);
        assert_eq!(star.runner.market.opening, Some(0.4));

        let owl = &table.entries[1];
        assert!(owl.runner.market.is_empty());
        assert!((owl.runner.weight_kg - 54.5).abs() < 1e-12);
    }

    #[test]
    fn test_load_features_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "bad.csv", "race_no,horse\n1,A\n");
        match load_features(&path) {
            Err(ModelError::MalformedInputFile { path: p, reason }) => {
                assert_eq!(p, path);
                assert!(reason.contains("dist_m"));
            }
            other => panic!("Expected MalformedInputFile, got {:?}", other),
        }
    }

    #[test]
    fn test_load_features_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "features.txt", FEATURES_CSV);
        assert!(matches!(
            load_features(&path),
            Err(ModelError::MalformedInputFile { .. })
        ));
    }

    #[test]
    fn test_load_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "results.json",
            r#"[
                {"race_no": 1, "placings": [{"pos": 1, "horse": "Star Gazer"}, {"pos": 2, "horse": "Night Owl"}]},
                {"race_no": 2, "meeting_date": "2025-08-27", "placings": [{"pos": 1, "horse": "Desert Wind"}]}
            ]"#,
        );
        let book = load_results(&path).unwrap();
        assert_eq!(book.len(), 2);

        let dated = NaiveDate::from_ymd_opt(2025, 8, 27);
        // Dated lookup falls back to the undated record
        assert_eq!(book.placings(&RaceKey::new(dated, 1)).len(), 2);
        assert_eq!(book.placings(&RaceKey::new(dated, 2))[0].horse, "Desert Wind");
        assert!(book.placings(&RaceKey::new(None, 9)).is_empty());
    }

    #[test]
    fn test_undated_race_uses_dated_result() {
        let d = |day| NaiveDate::from_ymd_opt(2025, 8, day);
        let book = ResultBook::new(vec![
            RaceResult {
                race_no: 1,
                meeting_date: d(28),
                placings: vec![Placing { pos: 1, horse: "Bravo".to_string() }],
            },
            RaceResult {
                race_no: 1,
                meeting_date: d(27),
                placings: vec![Placing { pos: 1, horse: "Alpha".to_string() }],
            },
            RaceResult {
                race_no: 2,
                meeting_date: d(27),
                placings: vec![Placing { pos: 1, horse: "Desert Wind".to_string() }],
            },
        ]);

        assert_eq!(book.placings(&RaceKey::new(None, 2))[0].horse, "Desert Wind");
        // Several dates: the earliest record wins
        assert_eq!(book.resolve(&RaceKey::new(None, 1)), Some(RaceKey::new(d(27), 1)));
        assert_eq!(book.placings(&RaceKey::new(None, 1))[0].horse, "Alpha");
        // An exact date never falls over to another date
        assert!(book.placings(&RaceKey::new(d(29), 1)).is_empty());
    }

    #[test]
    fn test_unused_records() {
        let book = ResultBook::new(vec![
            RaceResult { race_no: 1, meeting_date: None, placings: vec![] },
            RaceResult {
                race_no: 7,
                meeting_date: None,
                placings: vec![Placing { pos: 1, horse: "Ghost".to_string() }],
            },
        ]);
        let used: HashSet<RaceKey> = [RaceKey::new(None, 1)].into_iter().collect();
        let unused = book.unused(&used);
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].0, RaceKey::new(None, 7));
        assert_eq!(unused[0].1[0].horse, "Ghost");
    }

    #[test]
    fn test_load_results_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "results.json", r#"{"race_no": 1}"#);
        assert!(matches!(
            load_results(&path),
            Err(ModelError::MalformedInputFile { .. })
        ));
    }

    #[test]
    fn test_runner_table_roundtrip_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        let rows = vec![EvaluatedRunner {
            fold: 2,
            key: RaceKey::new(NaiveDate::from_ymd_opt(2025, 8, 27), 3),
            race_name: "Route Cup".to_string(),
            distance_m: 2000,
            horse: "Desert Wind".to_string(),
            age: 3,
            rating: 50,
            weight_kg: 55.0,
            p_market: 0.25,
            p_prior: 0.5,
            p_posterior: 0.4,
            kelly_stake: 0.1,
            position: 1,
        }];
        write_runner_table(&rows, &path).unwrap();
        let back = read_runner_table(&path).unwrap();
        assert_eq!(back.len(), 1);
        let (a, b) = (&back[0], &rows[0]);
        assert_eq!(a.fold, b.fold);
        assert_eq!(a.key, b.key);
        assert_eq!(a.race_name, b.race_name);
        assert_eq!(a.horse, b.horse);
        assert_eq!((a.age, a.rating, a.distance_m, a.position), (3, 50, 2000, 1));
        for (x, y) in [
            (a.weight_kg, b.weight_kg),
            (a.p_market, b.p_market),
            (a.p_prior, b.p_prior),
            (a.p_posterior, b.p_posterior),
            (a.kelly_stake, b.kelly_stake),
        ] {
            assert!((x - y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_read_replay_table_without_stakes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "meeting.csv",
            "race_no,dist_m,horse,p_market,p_posterior,pos\n1,1200,A,0.6,0.55,1\n1,1200,B,0.4,0.45,99\n",
        );
        let rows = read_runner_table(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fold, 0);
        assert_eq!(rows[0].kelly_stake, 0.0);
        assert_eq!(rows[1].position, 99);
    }

    #[test]
    fn test_table_format_from_path() {
        assert_eq!(TableFormat::from_path(Path::new("a.parquet")), Some(TableFormat::Parquet));
        assert_eq!(TableFormat::from_path(Path::new("a.CSV")), Some(TableFormat::Csv));
        assert_eq!(TableFormat::from_path(Path::new("a")), None);
    }
}
