use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::data::provider::TrendsProvider;
use crate::engine::types::DatasetKey;

use super::ai_format;
use super::response_types::{DailyFromDbResponse, MonthlyFromDbResponse};

pub async fn execute_daily(
    provider: &Arc<Mutex<TrendsProvider>>,
    key: &DatasetKey,
    start_year: i32,
    stop_year: i32,
    uniform: Option<bool>,
) -> Result<DailyFromDbResponse> {
    let provider = provider.lock().await;
    let retrieval = provider.get_daily_from_database(key, start_year, stop_year, uniform)?;
    Ok(ai_format::format_daily(key, retrieval))
}

pub async fn execute_monthly(
    provider: &Arc<Mutex<TrendsProvider>>,
    key: &DatasetKey,
    start_year: i32,
    stop_year: i32,
) -> Result<MonthlyFromDbResponse> {
    let provider = provider.lock().await;
    let monthly = provider.get_monthly_from_database(key, start_year, stop_year)?;
    Ok(ai_format::format_monthly(key, monthly))
}
