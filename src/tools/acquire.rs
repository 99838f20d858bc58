use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::data::provider::TrendsProvider;
use crate::engine::types::{PrecisionMode, QuerySpec};

use super::ai_format;
use super::response_types::AcquireResponse;

pub async fn execute(
    provider: &Arc<Mutex<TrendsProvider>>,
    spec: &QuerySpec,
    start_year: i32,
    stop_year: i32,
    precision: PrecisionMode,
) -> Result<AcquireResponse> {
    let mut provider = provider.lock().await;
    let before = provider.requests();
    let table = provider
        .acquire_daily_once(spec, start_year, stop_year, precision)
        .await?;
    let api_requests = provider.requests() - before;
    Ok(ai_format::format_acquire(spec, precision, &table, api_requests))
}
