use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::data::provider::TrendsProvider;
use crate::engine::types::{PrecisionMode, QuerySpec};

use super::ai_format;
use super::response_types::BuildResponse;

pub async fn execute(
    provider: &Arc<Mutex<TrendsProvider>>,
    spec: &QuerySpec,
    precision: PrecisionMode,
) -> Result<BuildResponse> {
    let mut provider = provider.lock().await;
    let before = provider.requests();
    let outcome = provider.build_database(spec, precision).await?;
    let api_requests = provider.requests() - before;
    Ok(ai_format::format_build(&spec.dataset_key(), outcome, api_requests))
}

pub async fn execute_monthly(
    provider: &Arc<Mutex<TrendsProvider>>,
    spec: &QuerySpec,
) -> Result<BuildResponse> {
    let mut provider = provider.lock().await;
    let before = provider.requests();
    let outcome = provider.build_monthly_database(spec).await?;
    let api_requests = provider.requests() - before;
    Ok(ai_format::format_build(&spec.dataset_key(), outcome, api_requests))
}
