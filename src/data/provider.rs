//! Acquisition and retrieval workflows over one query session and one dataset root.
//!
//! - **One-shot acquisition**: chunked daily fetch plus a single baseline
//!   query, scaled and returned without touching the store.
//! - **Database builds**: the same fetches, appended to the keyword's dataset
//!   as a column labelled with today's date. A second build on the same day is
//!   a no-op decided before any network traffic.
//! - **Retrieval**: robust aggregation over every stored pull.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use super::fetcher::RateLimitedFetcher;
use super::google::GoogleTrendsClient;
use super::store::{pull_label, restrict, Dataset, DatasetStore, Table};
use super::{Clock, QueryClient, SystemClock};
use crate::config::TrendsConfig;
use crate::engine::chunker::{plan, single_window, Alignment};
use crate::engine::scaling::{aggregate, concat_chunks, cross_median, scale_daily, Aggregation};
use crate::engine::types::{
    DatasetKey, PrecisionMode, QuerySpec, RobustTable, ScaledTable, TimeSeries,
};

/// Result of a database build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Appended {
        label: String,
        /// Chunk queries issued for the daily pull; zero for monthly-only builds.
        chunks: usize,
        monthly_points: usize,
        daily_points: usize,
        /// The baseline came from a monthly pull stored earlier the same day.
        reused_baseline: bool,
    },
    /// Today's pull is already stored; nothing was fetched.
    AlreadyPresent { label: String },
}

/// Robust daily series read back from a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRetrieval {
    /// Per-date median over the stored monthly pulls.
    pub monthly: TimeSeries,
    pub table: RobustTable,
    /// Aggregation policy that was applied.
    pub uniform: bool,
}

pub struct TrendsProvider {
    fetcher: RateLimitedFetcher,
    store: DatasetStore,
    clock: Arc<dyn Clock>,
    history_start: NaiveDate,
    low_span_months: u32,
    default_tz: i32,
}

impl TrendsProvider {
    pub fn new(client: Box<dyn QueryClient>, clock: Arc<dyn Clock>, config: &TrendsConfig) -> Self {
        Self {
            fetcher: RateLimitedFetcher::new(client, config.retry_policy(), config.pace_secs),
            store: DatasetStore::new(config.data_root.clone()),
            clock,
            history_start: config.history_start,
            low_span_months: config.max_span_months,
            default_tz: config.tz,
        }
    }

    /// Provider backed by the live service and the system clock.
    pub fn from_config(config: &TrendsConfig) -> Result<Self> {
        let client = GoogleTrendsClient::new(&config.hl, config.request_timeout())
            .context("Failed to create query client")?;
        Ok(Self::new(Box::new(client), Arc::new(SystemClock), config))
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub fn default_tz(&self) -> i32 {
        self.default_tz
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Query calls issued by this provider so far, retries included.
    pub fn requests(&self) -> u32 {
        self.fetcher.requests()
    }

    /// Fetch `[start_year, stop_year]` at daily resolution and scale it onto a
    /// baseline normalized over the whole history. Nothing is persisted.
    pub async fn acquire_daily_once(
        &mut self,
        spec: &QuerySpec,
        start_year: i32,
        stop_year: i32,
        precision: PrecisionMode,
    ) -> Result<ScaledTable> {
        let today = self.clock.today();
        let (start, stop) = year_range(start_year, stop_year, today)?;
        if start > stop {
            tracing::info!("{} starts after today; nothing to fetch", label(spec));
            return Ok(ScaledTable::default());
        }

        let baseline = self
            .fetch_baseline(spec, self.history_start.min(start), stop)
            .await?
            .between(start, stop);
        let (raw, _) = self.fetch_daily(spec, start, stop, precision).await?;
        Ok(scale_daily(&raw, &baseline))
    }

    /// Append today's monthly baseline and scaled daily pull to the dataset.
    pub async fn build_database(
        &mut self,
        spec: &QuerySpec,
        precision: PrecisionMode,
    ) -> Result<BuildOutcome> {
        let today = self.clock.today();
        let (mut dataset, label) = self.open_dataset(spec, today)?;
        if dataset.has_pull(Table::Daily, today) {
            tracing::info!("{label} already stored for {}; skipping", dataset.key);
            return Ok(BuildOutcome::AlreadyPresent { label });
        }

        let stored_baseline = dataset.monthly.get(&today).cloned();
        let reused_baseline = stored_baseline.is_some();
        let baseline = match stored_baseline {
            Some(baseline) => {
                tracing::info!("Reusing monthly pull {label} as baseline");
                baseline
            }
            None => self.fetch_baseline(spec, self.history_start, today).await?,
        };
        let (raw, chunks) = self
            .fetch_daily(spec, self.history_start, today, precision)
            .await?;
        let scaled = scale_daily(&raw, &baseline).scaled_series();

        let monthly_points = baseline.len();
        let daily_points = scaled.len();
        if !reused_baseline {
            dataset.append(Table::Monthly, today, baseline, None)?;
        }
        dataset.append(Table::Daily, today, scaled, Some(precision))?;
        self.store.save(&dataset)?;

        Ok(BuildOutcome::Appended {
            label,
            chunks,
            monthly_points,
            daily_points,
            reused_baseline,
        })
    }

    /// Append today's monthly baseline only.
    pub async fn build_monthly_database(&mut self, spec: &QuerySpec) -> Result<BuildOutcome> {
        let today = self.clock.today();
        let (mut dataset, label) = self.open_dataset(spec, today)?;
        if dataset.has_pull(Table::Monthly, today) {
            tracing::info!("{label} already stored for {}; skipping", dataset.key);
            return Ok(BuildOutcome::AlreadyPresent { label });
        }

        let baseline = self.fetch_baseline(spec, self.history_start, today).await?;
        let monthly_points = baseline.len();
        dataset.append(Table::Monthly, today, baseline, None)?;
        self.store.save(&dataset)?;

        Ok(BuildOutcome::Appended {
            label,
            chunks: 0,
            monthly_points,
            daily_points: 0,
            reused_baseline: false,
        })
    }

    /// Robust daily series for `[start_year, stop_year]`.
    ///
    /// With `uniform` unset, the policy follows the stored precision of each
    /// daily pull, falling back to uniform when that is unknown.
    pub fn get_daily_from_database(
        &self,
        key: &DatasetKey,
        start_year: i32,
        stop_year: i32,
        uniform: Option<bool>,
    ) -> Result<Option<DailyRetrieval>> {
        let Some(dataset) = self.load_dataset(key)? else {
            return Ok(None);
        };
        let (start, stop) = year_range(start_year, stop_year, self.clock.today())?;

        let monthly = cross_median(&restrict(&dataset.monthly, start, stop));
        let daily = restrict(&dataset.daily, start, stop);
        let uniform = uniform.or_else(|| dataset.is_uniform()).unwrap_or(true);
        let table = aggregate(&daily, &monthly, Aggregation::from_uniform(uniform));

        Ok(Some(DailyRetrieval {
            monthly,
            table,
            uniform,
        }))
    }

    /// Per-date median across every stored monthly pull within `[start_year, stop_year]`.
    pub fn get_monthly_from_database(
        &self,
        key: &DatasetKey,
        start_year: i32,
        stop_year: i32,
    ) -> Result<Option<TimeSeries>> {
        let Some(dataset) = self.load_dataset(key)? else {
            return Ok(None);
        };
        let (start, stop) = year_range(start_year, stop_year, self.clock.today())?;
        Ok(Some(cross_median(&restrict(&dataset.monthly, start, stop))))
    }

    /// Stored dataset for `key`; logs and returns `None` when there is none.
    pub fn load_dataset(&self, key: &DatasetKey) -> Result<Option<Dataset>> {
        let dataset = self.store.load(key)?;
        if dataset.is_none() {
            tracing::info!(
                "No data found for search term 'Category{}/{}/{}'",
                key.category,
                key.term,
                key.geo
            );
        }
        Ok(dataset)
    }

    fn open_dataset(&self, spec: &QuerySpec, today: NaiveDate) -> Result<(Dataset, String)> {
        let key = spec.dataset_key();
        let dataset = self
            .store
            .load(&key)?
            .unwrap_or_else(|| Dataset::empty(key.clone()));
        Ok((dataset, pull_label(&key.term, today)))
    }

    async fn fetch_baseline(
        &mut self,
        spec: &QuerySpec,
        start: NaiveDate,
        stop: NaiveDate,
    ) -> Result<TimeSeries> {
        let Some(window) = single_window(start, stop, self.clock.today()) else {
            return Ok(TimeSeries::new());
        };
        tracing::info!("Fetching baseline {}:{window}", label(spec));
        let baseline = self.fetcher.fetch(spec, &window).await?;
        tracing::debug!("Baseline returned {} points", baseline.len());
        Ok(baseline)
    }

    /// Chunked daily fetch, chunks issued in chronological order.
    async fn fetch_daily(
        &mut self,
        spec: &QuerySpec,
        start: NaiveDate,
        stop: NaiveDate,
        precision: PrecisionMode,
    ) -> Result<(TimeSeries, usize)> {
        let chunks = plan(
            start,
            stop,
            precision.span_months(self.low_span_months),
            Alignment::MonthEnd,
            self.clock.today(),
        );

        let pb = ProgressBar::new(chunks.len() as u64);
        pb.set_style(
            ProgressStyle::with_template("  {prefix:.bold} [{bar:30.cyan/dim}] {pos}/{len} chunks")
                .map(|s| s.progress_chars("=> "))
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_prefix(label(spec));

        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            tracing::info!("Fetching {}:{chunk}", label(spec));
            match self.fetcher.fetch(spec, chunk).await {
                Ok(part) => parts.push(part),
                Err(e) => {
                    pb.abandon_with_message(format!("error: {e}"));
                    return Err(e.into());
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        Ok((concat_chunks(parts), chunks.len()))
    }
}

fn label(spec: &QuerySpec) -> String {
    format!("Category{}/{}/{}", spec.category, spec.keyword, spec.geo)
}

/// January 1 of `start_year` through December 31 of `stop_year`, clamped to today.
fn year_range(start_year: i32, stop_year: i32, today: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(start_year, 1, 1)
        .with_context(|| format!("Year out of range: {start_year}"))?;
    let stop = NaiveDate::from_ymd_opt(stop_year, 12, 31)
        .with_context(|| format!("Year out of range: {stop_year}"))?;
    Ok((start, stop.min(today)))
}
