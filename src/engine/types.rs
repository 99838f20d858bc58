use chrono::{Datelike, Months, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ordered `(date, value)` observations with unique dates.
///
/// A date that is absent is a missing value; `0.0` is an observed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    points: BTreeMap<NaiveDate, f64>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a point, returning the value previously stored for `date`.
    pub fn insert(&mut self, date: NaiveDate, value: f64) -> Option<f64> {
        self.points.insert(date, value)
    }

    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.points.get(&date).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (NaiveDate, f64)> + '_ {
        self.points.iter().map(|(d, v)| (*d, *v))
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.points.keys().copied()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.keys().next().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.keys().next_back().copied()
    }

    /// Latest observation strictly before `date`.
    pub fn last_before(&self, date: NaiveDate) -> Option<(NaiveDate, f64)> {
        self.points.range(..date).next_back().map(|(d, v)| (*d, *v))
    }

    /// Points with `start <= date <= stop`.
    pub fn between(&self, start: NaiveDate, stop: NaiveDate) -> TimeSeries {
        if start > stop {
            return TimeSeries::new();
        }
        self.points
            .range(start..=stop)
            .map(|(d, v)| (*d, *v))
            .collect()
    }

    /// Append `other`; on a shared date the value from `other` wins.
    pub fn extend(&mut self, other: TimeSeries) {
        self.points.extend(other.points);
    }
}

impl FromIterator<(NaiveDate, f64)> for TimeSeries {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, f64)>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for TimeSeries {
    type Item = (NaiveDate, f64);
    type IntoIter = std::collections::btree_map::IntoIter<NaiveDate, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Last day of the month containing `date`.
pub fn month_end(date: NaiveDate) -> NaiveDate {
    month_start(date)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

/// Contiguous month starts from the month of `first` through the month of `last`.
pub fn month_index(first: NaiveDate, last: NaiveDate) -> Vec<NaiveDate> {
    let mut months = Vec::new();
    let last = month_start(last);
    let mut cur = month_start(first);
    while cur <= last {
        months.push(cur);
        match cur.checked_add_months(Months::new(1)) {
            Some(next) => cur = next,
            None => break,
        }
    }
    months
}

/// One bounded date range sent as a single query, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Chunk {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Chunk {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Renders the service's timeframe string, `"YYYY-MM-DD YYYY-MM-DD"`.
impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// One keyword query against the external service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub keyword: String,
    pub category: u32,
    pub geo: String,
    /// Timezone offset in minutes west of UTC (240 = US Eastern daylight time).
    pub tz: i32,
}

impl QuerySpec {
    pub fn new(keyword: impl Into<String>, category: u32, geo: impl Into<String>, tz: i32) -> Self {
        Self {
            keyword: keyword.into(),
            category,
            geo: geo.into(),
            tz,
        }
    }

    pub fn dataset_key(&self) -> DatasetKey {
        DatasetKey::new(self.category, &self.keyword, &self.geo)
    }
}

/// Identifies one persisted dataset: `(category, term, geo)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetKey {
    pub category: u32,
    pub term: String,
    pub geo: String,
}

impl DatasetKey {
    pub fn new(category: u32, term: &str, geo: &str) -> Self {
        Self {
            category,
            term: term.to_string(),
            geo: geo.to_string(),
        }
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.category, self.term, self.geo)
    }
}

/// Chunk width used for daily pulls.
///
/// `High` fetches one calendar month per query: finer normalization at the cost
/// of far more requests per keyword against the service's daily quota.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum PrecisionMode {
    #[default]
    Low,
    High,
}

impl PrecisionMode {
    pub fn from_flag(high_precision: bool) -> Self {
        if high_precision {
            PrecisionMode::High
        } else {
            PrecisionMode::Low
        }
    }

    /// Months per chunk given the configured low-precision span.
    pub fn span_months(self, low_span_months: u32) -> u32 {
        match self {
            PrecisionMode::Low => low_span_months.max(1),
            PrecisionMode::High => 1,
        }
    }
}

/// One row of the single-pull scaling output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScaledRow {
    pub date: NaiveDate,
    pub unscaled: f64,
    /// Baseline value for the row's month, forward-filled.
    pub monthly: Option<f64>,
    pub scale: Option<f64>,
    pub scaled: Option<f64>,
}

/// Daily values rescaled onto a single baseline, one row per fetched day.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScaledTable {
    pub rows: Vec<ScaledRow>,
}

impl ScaledTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The comparable series; days in months without a defined scale are absent.
    pub fn scaled_series(&self) -> TimeSeries {
        self.rows
            .iter()
            .filter_map(|r| r.scaled.map(|v| (r.date, v)))
            .collect()
    }
}

/// One row of the multi-pull aggregation output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RobustRow {
    pub date: NaiveDate,
    /// Cross-pull median for the day.
    pub daily: Option<f64>,
    /// Monthly-median baseline for the row's month, forward-filled.
    pub monthly: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RobustTable {
    pub rows: Vec<RobustRow>,
}

impl RobustTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
