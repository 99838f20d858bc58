use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::engine::types::PrecisionMode;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DateRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SeriesPoint {
    pub date: String,
    pub value: f64,
}

/// One day of a single-pull scaling.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScaledPoint {
    pub date: String,
    pub unscaled: f64,
    pub monthly: Option<f64>,
    pub scale: Option<f64>,
    pub scaled: Option<f64>,
}

/// One day of a multi-pull aggregation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RobustPoint {
    pub date: String,
    pub daily: Option<f64>,
    pub monthly: Option<f64>,
}

/// Response for `acquire_daily_once`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AcquireResponse {
    pub summary: String,
    pub search_term: String,
    pub precision: PrecisionMode,
    pub rows: usize,
    /// Days whose month had no usable scale factor.
    pub unscaled_days: usize,
    pub api_requests: u32,
    pub date_range: DateRange,
    pub data: Vec<ScaledPoint>,
    pub suggested_next_steps: Vec<String>,
}

/// Response for `build_database` and `build_monthly_database`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BuildResponse {
    pub summary: String,
    pub dataset: String,
    pub label: String,
    /// False when today's pull was already stored.
    pub appended: bool,
    pub reused_baseline: bool,
    pub chunks: usize,
    pub monthly_points: usize,
    pub daily_points: usize,
    pub api_requests: u32,
    pub suggested_next_steps: Vec<String>,
}

/// Response for `get_daily_from_database`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DailyFromDbResponse {
    pub summary: String,
    pub dataset: String,
    pub found: bool,
    pub uniform: Option<bool>,
    pub rows: usize,
    pub date_range: DateRange,
    pub monthly: Vec<SeriesPoint>,
    pub data: Vec<RobustPoint>,
    pub suggested_next_steps: Vec<String>,
}

/// Response for `get_monthly_from_database`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyFromDbResponse {
    pub summary: String,
    pub dataset: String,
    pub found: bool,
    pub rows: usize,
    pub date_range: DateRange,
    pub data: Vec<SeriesPoint>,
    pub suggested_next_steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PullInfo {
    pub label: String,
    pub pulled_on: String,
    pub tables: Vec<String>,
    pub precision: Option<PrecisionMode>,
}

/// Response for `check_dataset_status`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DatasetStatusResponse {
    pub summary: String,
    pub dataset: String,
    pub exists: bool,
    pub path: String,
    pub pulls: Vec<PullInfo>,
    pub monthly_range: DateRange,
    pub daily_range: DateRange,
    /// Whether every daily pull shares one precision; unknown when `None`.
    pub uniform: Option<bool>,
    pub suggested_next_steps: Vec<String>,
}
