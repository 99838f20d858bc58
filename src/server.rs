use chrono::Datelike;
use garde::Validate;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Json},
    model::{Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ServerHandler,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::data::provider::TrendsProvider;
use crate::engine::types::{DatasetKey, PrecisionMode, QuerySpec};
use crate::tools;
use crate::tools::response_types::{
    AcquireResponse, BuildResponse, DailyFromDbResponse, DatasetStatusResponse,
    MonthlyFromDbResponse,
};

/// Earliest year the service has data for.
const FIRST_YEAR: i32 = 2004;

fn default_geo() -> String {
    "US".to_string()
}

fn validate_stop_not_before_start(
    start_year: &i32,
) -> impl FnOnce(&i32, &()) -> garde::Result + '_ {
    move |stop_year: &i32, (): &()| {
        if stop_year < start_year {
            return Err(garde::Error::new(format!(
                "stop_year ({stop_year}) must not be before start_year ({start_year})"
            )));
        }
        Ok(())
    }
}

/// Fill in omitted read years: from the first year of data through the current year.
fn resolve_years(
    start_year: Option<i32>,
    stop_year: Option<i32>,
    this_year: i32,
) -> Result<(i32, i32), String> {
    let start = start_year.unwrap_or(FIRST_YEAR);
    let stop = stop_year.unwrap_or(this_year);
    if stop < start {
        return Err(format!(
            "Validation error: stop_year ({stop}) must not be before start_year ({start})"
        ));
    }
    Ok((start, stop))
}

#[derive(Clone)]
pub struct TrendsServer {
    pub provider: Arc<Mutex<TrendsProvider>>,
    tool_router: ToolRouter<Self>,
}

impl TrendsServer {
    pub fn new(provider: Arc<Mutex<TrendsProvider>>) -> Self {
        Self {
            provider,
            tool_router: Self::tool_router(),
        }
    }

    async fn query_spec(&self, term: &str, category: u32, geo: &str, tz: Option<i32>) -> QuerySpec {
        let tz = match tz {
            Some(tz) => tz,
            None => self.provider.lock().await.default_tz(),
        };
        QuerySpec::new(term, category, geo, tz)
    }

    async fn this_year(&self) -> i32 {
        self.provider.lock().await.today().year()
    }
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct AcquireDailyParams {
    /// Search term (e.g. "flu")
    #[garde(length(min = 1, max = 100), pattern(r"^[^/\\]+$"))]
    pub term: String,
    /// Region code such as "US" or "US-NY"; empty for worldwide (default "US")
    #[serde(default = "default_geo")]
    #[garde(pattern(r"^[A-Za-z-]{0,8}$"))]
    pub geo: String,
    /// Category id (default 0, all categories)
    #[serde(default)]
    #[garde(skip)]
    pub category: u32,
    /// Timezone offset in minutes west of UTC (default from server config, usually 240)
    #[garde(inner(range(min = -840, max = 840)))]
    pub tz: Option<i32>,
    /// First calendar year to fetch
    #[garde(range(min = 2004, max = 2100))]
    pub start_year: i32,
    /// Last calendar year to fetch (clamped to today)
    #[garde(
        range(min = 2004, max = 2100),
        custom(validate_stop_not_before_start(&self.start_year))
    )]
    pub stop_year: i32,
    /// One calendar month per query (default true); false uses 8-month chunks
    #[garde(skip)]
    pub high_precision: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct BuildDatabaseParams {
    /// Search term (e.g. "flu")
    #[garde(length(min = 1, max = 100), pattern(r"^[^/\\]+$"))]
    pub term: String,
    /// Region code such as "US" or "US-NY"; empty for worldwide (default "US")
    #[serde(default = "default_geo")]
    #[garde(pattern(r"^[A-Za-z-]{0,8}$"))]
    pub geo: String,
    /// Category id (default 0, all categories)
    #[serde(default)]
    #[garde(skip)]
    pub category: u32,
    /// Timezone offset in minutes west of UTC (default from server config, usually 240)
    #[garde(inner(range(min = -840, max = 840)))]
    pub tz: Option<i32>,
    /// One calendar month per query (default false); recorded with the pull
    #[serde(default)]
    #[garde(skip)]
    pub high_precision: bool,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct BuildMonthlyParams {
    /// Search term (e.g. "flu")
    #[garde(length(min = 1, max = 100), pattern(r"^[^/\\]+$"))]
    pub term: String,
    /// Region code such as "US" or "US-NY"; empty for worldwide (default "US")
    #[serde(default = "default_geo")]
    #[garde(pattern(r"^[A-Za-z-]{0,8}$"))]
    pub geo: String,
    /// Category id (default 0, all categories)
    #[serde(default)]
    #[garde(skip)]
    pub category: u32,
    /// Timezone offset in minutes west of UTC (default from server config, usually 240)
    #[garde(inner(range(min = -840, max = 840)))]
    pub tz: Option<i32>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct DailyFromDbParams {
    /// Search term of a stored dataset
    #[garde(length(min = 1, max = 100), pattern(r"^[^/\\]+$"))]
    pub term: String,
    /// Region code the dataset was built with (default "US")
    #[serde(default = "default_geo")]
    #[garde(pattern(r"^[A-Za-z-]{0,8}$"))]
    pub geo: String,
    /// Category id the dataset was built with (default 0)
    #[serde(default)]
    #[garde(skip)]
    pub category: u32,
    /// First year to return (default 2004)
    #[garde(inner(range(min = 2004, max = 2100)))]
    pub start_year: Option<i32>,
    /// Last year to return (default: current year)
    #[garde(inner(range(min = 2004, max = 2100)))]
    pub stop_year: Option<i32>,
    /// true: plain per-date median; false: normalize each pull to the monthly
    /// baseline first. Omit to decide from the recorded precision of each pull.
    #[garde(skip)]
    pub uniform: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct MonthlyFromDbParams {
    /// Search term of a stored dataset
    #[garde(length(min = 1, max = 100), pattern(r"^[^/\\]+$"))]
    pub term: String,
    /// Region code the dataset was built with (default "US")
    #[serde(default = "default_geo")]
    #[garde(pattern(r"^[A-Za-z-]{0,8}$"))]
    pub geo: String,
    /// Category id the dataset was built with (default 0)
    #[serde(default)]
    #[garde(skip)]
    pub category: u32,
    /// First year to return (default 2004)
    #[garde(inner(range(min = 2004, max = 2100)))]
    pub start_year: Option<i32>,
    /// Last year to return (default: current year)
    #[garde(inner(range(min = 2004, max = 2100)))]
    pub stop_year: Option<i32>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct DatasetStatusParams {
    /// Search term of the dataset
    #[garde(length(min = 1, max = 100), pattern(r"^[^/\\]+$"))]
    pub term: String,
    /// Region code (default "US")
    #[serde(default = "default_geo")]
    #[garde(pattern(r"^[A-Za-z-]{0,8}$"))]
    pub geo: String,
    /// Category id (default 0)
    #[serde(default)]
    #[garde(skip)]
    pub category: u32,
}

use rmcp::handler::server::wrapper::Parameters;

#[tool_router]
impl TrendsServer {
    /// Fetch daily search interest for one term and scale it onto a single monthly baseline.
    ///
    /// **When to use**: One-off analysis; nothing is stored
    /// **Prerequisites**: None
    /// **Next tool**: build_database (to keep repeated pulls)
    ///
    /// Splits the years into query windows, fetches each, then rescales every
    /// month so values are comparable across windows. Rate limits are waited out,
    /// so long ranges can take minutes.
    #[tool(name = "acquire_daily_once")]
    async fn acquire_daily_once(
        &self,
        Parameters(params): Parameters<AcquireDailyParams>,
    ) -> Result<Json<AcquireResponse>, String> {
        params
            .validate()
            .map_err(|e| format!("Validation error: {e}"))?;
        let spec = self
            .query_spec(&params.term, params.category, &params.geo, params.tz)
            .await;
        let precision = PrecisionMode::from_flag(params.high_precision.unwrap_or(true));
        tools::acquire::execute(
            &self.provider,
            &spec,
            params.start_year,
            params.stop_year,
            precision,
        )
        .await
        .map(Json)
        .map_err(|e| format!("Error: {e}"))
    }

    /// Append today's monthly baseline and scaled daily pull to the term's dataset.
    ///
    /// **When to use**: Periodically (at most once per day) to accumulate pulls
    /// **Prerequisites**: None (creates the dataset on first use)
    /// **Next tools**: check_dataset_status, get_daily_from_database
    ///
    /// A second call on the same day is a no-op and performs no queries.
    #[tool(name = "build_database")]
    async fn build_database(
        &self,
        Parameters(params): Parameters<BuildDatabaseParams>,
    ) -> Result<Json<BuildResponse>, String> {
        params
            .validate()
            .map_err(|e| format!("Validation error: {e}"))?;
        let spec = self
            .query_spec(&params.term, params.category, &params.geo, params.tz)
            .await;
        tools::build::execute(
            &self.provider,
            &spec,
            PrecisionMode::from_flag(params.high_precision),
        )
        .await
        .map(Json)
        .map_err(|e| format!("Error: {e}"))
    }

    /// Append today's monthly baseline only.
    ///
    /// **When to use**: To track monthly interest cheaply (one query)
    /// **Next tool**: get_monthly_from_database
    #[tool(name = "build_monthly_database")]
    async fn build_monthly_database(
        &self,
        Parameters(params): Parameters<BuildMonthlyParams>,
    ) -> Result<Json<BuildResponse>, String> {
        params
            .validate()
            .map_err(|e| format!("Validation error: {e}"))?;
        let spec = self
            .query_spec(&params.term, params.category, &params.geo, params.tz)
            .await;
        tools::build::execute_monthly(&self.provider, &spec)
            .await
            .map(Json)
            .map_err(|e| format!("Error: {e}"))
    }

    /// Combine every stored daily pull of a dataset into one robust daily series.
    ///
    /// **Prerequisites**: build_database has run at least once for the term
    ///
    /// Returns found=false (not an error) when the dataset does not exist.
    #[tool(name = "get_daily_from_database")]
    async fn get_daily_from_database(
        &self,
        Parameters(params): Parameters<DailyFromDbParams>,
    ) -> Result<Json<DailyFromDbResponse>, String> {
        params
            .validate()
            .map_err(|e| format!("Validation error: {e}"))?;
        let (start, stop) =
            resolve_years(params.start_year, params.stop_year, self.this_year().await)?;
        let key = DatasetKey::new(params.category, &params.term, &params.geo);
        tools::retrieve::execute_daily(&self.provider, &key, start, stop, params.uniform)
            .await
            .map(Json)
            .map_err(|e| format!("Error: {e}"))
    }

    /// Median across every stored monthly pull of a dataset.
    ///
    /// **Prerequisites**: build_database or build_monthly_database has run for the term
    #[tool(name = "get_monthly_from_database")]
    async fn get_monthly_from_database(
        &self,
        Parameters(params): Parameters<MonthlyFromDbParams>,
    ) -> Result<Json<MonthlyFromDbResponse>, String> {
        params
            .validate()
            .map_err(|e| format!("Validation error: {e}"))?;
        let (start, stop) =
            resolve_years(params.start_year, params.stop_year, self.this_year().await)?;
        let key = DatasetKey::new(params.category, &params.term, &params.geo);
        tools::retrieve::execute_monthly(&self.provider, &key, start, stop)
            .await
            .map(Json)
            .map_err(|e| format!("Error: {e}"))
    }

    /// Report whether a dataset exists, its stored pulls and their precision.
    #[tool(name = "check_dataset_status")]
    async fn check_dataset_status(
        &self,
        Parameters(params): Parameters<DatasetStatusParams>,
    ) -> Result<Json<DatasetStatusResponse>, String> {
        params
            .validate()
            .map_err(|e| format!("Validation error: {e}"))?;
        let key = DatasetKey::new(params.category, &params.term, &params.geo);
        tools::dataset_status::execute(&self.provider, &key)
            .await
            .map(Json)
            .map_err(|e| format!("Error: {e}"))
    }
}

#[tool_handler]
impl ServerHandler for TrendsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "trendstitch-mcp".into(),
                title: None,
                version: "0.1.0".into(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Long-range daily search interest from a service that only returns values \
                normalized 0-100 within each query window.\
                \n\nOne-off analysis:\
                \n1. acquire_daily_once({ term, start_year, stop_year, geo?, category? }) fetches \
                month-sized windows plus one monthly baseline and rescales every month onto it. \
                Nothing is stored.\
                \n\nAccumulating pulls over time:\
                \n1. build_database({ term, geo?, category?, high_precision? }) appends today's \
                pull to the term's dataset. Same-day repeats are no-ops.\
                \n2. build_monthly_database({ term }) stores the monthly baseline only.\
                \n3. check_dataset_status({ term }) lists stored pulls and their precision.\
                \n4. get_daily_from_database({ term, start_year?, stop_year?, uniform? }) returns \
                the per-date median across pulls; uniform=false normalizes each pull to the \
                monthly baseline first.\
                \n5. get_monthly_from_database({ term }) returns the monthly median.\
                \n\nThe service rate-limits aggressively. Acquisitions wait out throttling and \
                may take minutes; only one runs at a time."
                    .into(),
            ),
        }
    }
}
