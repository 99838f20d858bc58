use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::data::provider::TrendsProvider;
use crate::engine::types::DatasetKey;

use super::ai_format;
use super::response_types::DatasetStatusResponse;

pub async fn execute(
    provider: &Arc<Mutex<TrendsProvider>>,
    key: &DatasetKey,
) -> Result<DatasetStatusResponse> {
    let provider = provider.lock().await;
    let path = provider.store().dataset_dir(key)?.display().to_string();
    let dataset = provider.store().load(key)?;
    Ok(ai_format::format_status(key, path, dataset.as_ref()))
}
