#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use trendstitch_mcp::config::{RetrySettings, TrendsConfig};
use trendstitch_mcp::data::provider::TrendsProvider;
use trendstitch_mcp::data::{Clock, QueryClient, QueryError};
use trendstitch_mcp::engine::types::{Chunk, QuerySpec, TimeSeries};

/// Windows longer than this come back at monthly resolution, like the live service.
const DAILY_LIMIT_DAYS: i64 = 270;

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// Simulated "today" for every test provider.
pub fn today() -> NaiveDate {
    d(2020, 3, 15)
}

pub fn history_start() -> NaiveDate {
    d(2019, 1, 1)
}

pub fn flu() -> QuerySpec {
    QuerySpec::new("flu", 0, "US", 240)
}

/// Deterministic stand-in for the query service.
///
/// Long windows return one value per month (`10 * month number`, dated the
/// first of the month); short windows return `5.0` for every day. Scaling a
/// daily pull against a long-window baseline therefore yields `10 * month`.
pub struct SyntheticClient {
    calls: Arc<AtomicU32>,
    /// 1-based call numbers that fail, with the error returned.
    failures: HashMap<u32, QueryError>,
}

impl SyntheticClient {
    pub fn new() -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                calls: calls.clone(),
                failures: HashMap::new(),
            },
            calls,
        )
    }

    pub fn failing_on(mut self, call: u32, err: QueryError) -> Self {
        self.failures.insert(call, err);
        self
    }
}

pub fn monthly_value(date: NaiveDate) -> f64 {
    f64::from(date.month()) * 10.0
}

#[async_trait]
impl QueryClient for SyntheticClient {
    async fn query(
        &mut self,
        _spec: &QuerySpec,
        timeframe: &Chunk,
    ) -> Result<TimeSeries, QueryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.failures.get(&call) {
            return Err(err.clone());
        }

        let mut series = TimeSeries::new();
        let mut cur = timeframe.start;
        if timeframe.num_days() > DAILY_LIMIT_DAYS {
            while cur <= timeframe.end {
                if cur.day() == 1 {
                    series.insert(cur, monthly_value(cur));
                }
                cur = cur.succ_opt().unwrap();
            }
        } else {
            while cur <= timeframe.end {
                series.insert(cur, 5.0);
                cur = cur.succ_opt().unwrap();
            }
        }
        Ok(series)
    }
}

/// A clock tests can move forward.
pub struct TestClock(Mutex<NaiveDate>);

impl TestClock {
    pub fn new(date: NaiveDate) -> Arc<Self> {
        Arc::new(Self(Mutex::new(date)))
    }

    pub fn set(&self, date: NaiveDate) {
        *self.0.lock().unwrap() = date;
    }
}

impl Clock for TestClock {
    fn today(&self) -> NaiveDate {
        *self.0.lock().unwrap()
    }
}

/// No backoff waits and no pacing, rooted at `root`.
pub fn test_config(root: &Path) -> TrendsConfig {
    TrendsConfig {
        data_root: root.to_path_buf(),
        history_start: history_start(),
        pace_secs: 0.0,
        retry: RetrySettings {
            base_delay_secs: 0,
            increment_secs: 0,
            max_attempts: None,
            max_elapsed_secs: None,
        },
        ..TrendsConfig::default()
    }
}

pub fn make_provider(
    root: &Path,
    client: SyntheticClient,
    clock: Arc<TestClock>,
) -> TrendsProvider {
    TrendsProvider::new(Box::new(client), clock, &test_config(root))
}
