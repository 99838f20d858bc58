//! Per-keyword dataset persistence.
//!
//! Each `(category, term, geo)` dataset lives in its own directory:
//!
//! ```text
//! <root>/<category>_<term>_<geo>/
//!     monthly.parquet   date + one Float64 column per pull
//!     daily.parquet     date + one Float64 column per pull
//!     manifest.json     per-pull metadata (tables written, precision)
//! ```
//!
//! Pull columns are labelled `<term>_MM_DD_YYYY` after the date they were
//! fetched. Saves write a complete staging directory next to the dataset and
//! swap it in by rename, so readers never observe a half-written dataset.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use crate::engine::types::{DatasetKey, PrecisionMode, TimeSeries};

pub const DATE_COL: &str = "date";
const MONTHLY_FILE: &str = "monthly.parquet";
const DAILY_FILE: &str = "daily.parquet";
const MANIFEST_FILE: &str = "manifest.json";

/// Pull date label suffix, e.g. `flu_03_15_2020`.
const LABEL_DATE_FORMAT: &str = "%m_%d_%Y";
const LABEL_DATE_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Monthly,
    Daily,
}

impl Table {
    fn file_name(self) -> &'static str {
        match self {
            Table::Monthly => MONTHLY_FILE,
            Table::Daily => DAILY_FILE,
        }
    }
}

/// Pull date to the series fetched that day.
pub type PullTable = BTreeMap<NaiveDate, TimeSeries>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullRecord {
    pub tables: BTreeSet<Table>,
    /// Chunk precision of the daily pull; `None` for monthly-only pulls or
    /// when the pull predates the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<PrecisionMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub term: String,
    #[serde(default)]
    pub pulls: BTreeMap<NaiveDate, PullRecord>,
}

/// In-memory form of one persisted dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub key: DatasetKey,
    pub monthly: PullTable,
    pub daily: PullTable,
    pub manifest: Manifest,
}

impl Dataset {
    pub fn empty(key: DatasetKey) -> Self {
        let manifest = Manifest {
            term: key.term.clone(),
            pulls: BTreeMap::new(),
        };
        Self {
            key,
            monthly: PullTable::new(),
            daily: PullTable::new(),
            manifest,
        }
    }

    pub fn table(&self, table: Table) -> &PullTable {
        match table {
            Table::Monthly => &self.monthly,
            Table::Daily => &self.daily,
        }
    }

    pub fn has_pull(&self, table: Table, date: NaiveDate) -> bool {
        self.table(table).contains_key(&date)
    }

    /// Add one pull column. A table never holds two pulls for the same date.
    pub fn append(
        &mut self,
        table: Table,
        date: NaiveDate,
        series: TimeSeries,
        precision: Option<PrecisionMode>,
    ) -> Result<()> {
        if self.has_pull(table, date) {
            bail!(
                "{} already has a {:?} pull labelled {}",
                self.key,
                table,
                pull_label(&self.key.term, date)
            );
        }
        match table {
            Table::Monthly => self.monthly.insert(date, series),
            Table::Daily => self.daily.insert(date, series),
        };
        let record = self.manifest.pulls.entry(date).or_default();
        record.tables.insert(table);
        if precision.is_some() {
            record.precision = precision;
        }
        Ok(())
    }

    /// Whether every daily pull shares one precision mode.
    ///
    /// `None` when there are no daily pulls or any pull's precision is unknown.
    pub fn is_uniform(&self) -> Option<bool> {
        let mut modes = HashSet::new();
        for date in self.daily.keys() {
            let precision = self.manifest.pulls.get(date).and_then(|r| r.precision)?;
            modes.insert(precision);
        }
        if modes.is_empty() {
            None
        } else {
            Some(modes.len() == 1)
        }
    }

    /// Earliest and latest observation across every pull of `table`.
    pub fn span(&self, table: Table) -> Option<(NaiveDate, NaiveDate)> {
        let pulls = self.table(table);
        let first = pulls.values().filter_map(TimeSeries::first_date).min()?;
        let last = pulls.values().filter_map(TimeSeries::last_date).max()?;
        Some((first, last))
    }
}

/// Rows of every pull restricted to `start..=stop`; pulls left empty are dropped.
pub fn restrict(table: &PullTable, start: NaiveDate, stop: NaiveDate) -> PullTable {
    table
        .iter()
        .map(|(pulled, series)| (*pulled, series.between(start, stop)))
        .filter(|(_, series)| !series.is_empty())
        .collect()
}

pub fn pull_label(term: &str, date: NaiveDate) -> String {
    format!("{term}_{}", date.format(LABEL_DATE_FORMAT))
}

/// Pull date encoded in a column label. Terms may themselves contain
/// underscores, so only the fixed-width suffix is parsed.
pub fn parse_pull_label(label: &str) -> Option<NaiveDate> {
    let split = label.len().checked_sub(LABEL_DATE_LEN + 1)?;
    if !label.is_char_boundary(split) || label.as_bytes()[split] != b'_' {
        return None;
    }
    NaiveDate::parse_from_str(&label[split + 1..], LABEL_DATE_FORMAT).ok()
}

/// Wide frame: the union of observed dates plus one nullable column per pull.
pub fn table_to_frame(term: &str, table: &PullTable) -> Result<DataFrame> {
    let dates: Vec<NaiveDate> = table
        .values()
        .flat_map(TimeSeries::dates)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let n = dates.len();

    let mut columns =
        vec![DateChunked::from_naive_date(PlSmallStr::from(DATE_COL), dates.iter().copied())
            .into_column()];
    for (pulled, series) in table {
        let values: Vec<Option<f64>> = dates.iter().map(|d| series.get(*d)).collect();
        columns.push(Column::new(pull_label(term, *pulled).into(), values));
    }

    DataFrame::new(n, columns).context("Failed to build pull table frame")
}

pub fn frame_to_table(df: &DataFrame) -> Result<PullTable> {
    let date_col = df
        .column(DATE_COL)
        .with_context(|| format!("Pull table has no '{DATE_COL}' column"))?;
    let days = date_col.date()?;
    let dates: Vec<Option<NaiveDate>> = (0..df.height())
        .map(|i| {
            days.phys
                .get(i)
                .and_then(|d| NaiveDate::from_num_days_from_ce_opt(d + 719_163))
        })
        .collect();

    let mut table = PullTable::new();
    for name in df.get_column_names() {
        let name = name.as_str();
        if name == DATE_COL {
            continue;
        }
        let Some(pulled) = parse_pull_label(name) else {
            tracing::warn!("Ignoring unrecognised column '{name}' in pull table");
            continue;
        };
        let values = df
            .column(name)?
            .f64()
            .with_context(|| format!("Pull column '{name}' is not Float64"))?;
        let series: TimeSeries = dates
            .iter()
            .zip(values.iter())
            .filter_map(|(date, value)| Some(((*date)?, value?)))
            .collect();
        table.insert(pulled, series);
    }
    Ok(table)
}

/// Loads and saves datasets under one root directory.
pub struct DatasetStore {
    root: PathBuf,
}

impl DatasetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns an error if the key would escape the root directory.
    pub fn dataset_dir(&self, key: &DatasetKey) -> Result<PathBuf> {
        validate_path_segment(&key.term).with_context(|| format!("Invalid term: {}", key.term))?;
        let name = key.to_string();
        validate_path_segment(&name).with_context(|| format!("Invalid dataset name: {name}"))?;
        Ok(self.root.join(name))
    }

    /// `Ok(None)` when nothing has been stored for `key` yet.
    pub fn load(&self, key: &DatasetKey) -> Result<Option<Dataset>> {
        let dir = self.dataset_dir(key)?;
        if !dir.is_dir() {
            return Ok(None);
        }

        let mut dataset = Dataset::empty(key.clone());
        dataset.monthly = read_table(&dir.join(Table::Monthly.file_name()))?;
        dataset.daily = read_table(&dir.join(Table::Daily.file_name()))?;

        let manifest_path = dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            let raw = std::fs::read_to_string(&manifest_path)
                .with_context(|| format!("Failed to read {}", manifest_path.display()))?;
            dataset.manifest = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", manifest_path.display()))?;
        }
        // Tables are the source of truth for which pulls exist.
        for (table, pulls) in [
            (Table::Monthly, &dataset.monthly),
            (Table::Daily, &dataset.daily),
        ] {
            for date in pulls.keys() {
                dataset
                    .manifest
                    .pulls
                    .entry(*date)
                    .or_default()
                    .tables
                    .insert(table);
            }
        }

        Ok(Some(dataset))
    }

    pub fn save(&self, dataset: &Dataset) -> Result<()> {
        let dir = self.dataset_dir(&dataset.key)?;
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create data root: {}", self.root.display()))?;

        let name = dataset.key.to_string();
        let staging = self
            .root
            .join(format!(".{name}.staging-{}", uuid::Uuid::new_v4()));
        if let Err(e) = write_dataset(&staging, dataset) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        if dir.exists() {
            let retired = self
                .root
                .join(format!(".{name}.retired-{}", uuid::Uuid::new_v4()));
            std::fs::rename(&dir, &retired).with_context(|| {
                format!("Failed to rename {} → {}", dir.display(), retired.display())
            })?;
            if let Err(e) = std::fs::rename(&staging, &dir) {
                // Put the previous dataset back before reporting.
                let _ = std::fs::rename(&retired, &dir);
                let _ = std::fs::remove_dir_all(&staging);
                return Err(e).with_context(|| format!("Failed to replace {}", dir.display()));
            }
            if let Err(e) = std::fs::remove_dir_all(&retired) {
                tracing::warn!("Could not remove {}: {e}", retired.display());
            }
        } else {
            std::fs::rename(&staging, &dir).with_context(|| {
                format!("Failed to rename {} → {}", staging.display(), dir.display())
            })?;
        }

        tracing::info!(
            dataset = %name,
            monthly_pulls = dataset.monthly.len(),
            daily_pulls = dataset.daily.len(),
            "Saved dataset"
        );
        Ok(())
    }
}

fn write_dataset(dir: &Path, dataset: &Dataset) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create staging dir: {}", dir.display()))?;
    for (table, pulls) in [
        (Table::Monthly, &dataset.monthly),
        (Table::Daily, &dataset.daily),
    ] {
        if pulls.is_empty() {
            continue;
        }
        let mut df = table_to_frame(&dataset.key.term, pulls)?;
        let path = dir.join(table.file_name());
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        ParquetWriter::new(file)
            .finish(&mut df)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    let manifest = serde_json::to_string_pretty(&dataset.manifest)?;
    std::fs::write(dir.join(MANIFEST_FILE), manifest).context("Failed to write manifest")?;
    Ok(())
}

fn read_table(path: &Path) -> Result<PullTable> {
    if !path.exists() {
        return Ok(PullTable::new());
    }
    // Eager read; a lazy scan panics inside a tokio worker.
    let file =
        std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let df = ParquetReader::new(file)
        .finish()
        .with_context(|| format!("Failed to read {}", path.display()))?;
    frame_to_table(&df)
}

/// Ensure a path segment contains only safe characters.
fn validate_path_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        bail!("path segment must not be empty");
    }
    if segment.starts_with('.') {
        bail!("path segment must not start with '.': {segment}");
    }
    if std::path::Path::new(segment)
        .components()
        .any(|c| !matches!(c, std::path::Component::Normal(_)))
    {
        bail!("path segment contains illegal characters or components: {segment}");
    }
    if segment.contains('/') || segment.contains('\\') {
        bail!("path segment must not contain path separators: {segment}");
    }
    Ok(())
}
