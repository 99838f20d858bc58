pub mod fetcher;
pub mod google;
pub mod provider;
pub mod store;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use thiserror::Error;

use crate::engine::types::{Chunk, QuerySpec, TimeSeries};

/// Failure classes reported by the query service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// Too many requests; the same query will succeed later.
    #[error("rate limited by the service (HTTP {status})")]
    RateLimited { status: u16 },
    /// Server-side failure that is expected to clear on its own.
    #[error("service temporarily unavailable (HTTP {status})")]
    Unavailable { status: u16 },
    /// The service refused the request outright.
    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl QueryError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueryError::RateLimited { .. } | QueryError::Unavailable { .. }
        )
    }
}

/// The external query capability: one keyword, one timeframe, one series back.
///
/// Implementations own their session state (cookies, tokens), which is why
/// `query` takes `&mut self`: one acquisition threads one session through
/// every chunk it fetches.
#[async_trait]
pub trait QueryClient: Send {
    async fn query(
        &mut self,
        spec: &QuerySpec,
        timeframe: &Chunk,
    ) -> Result<TimeSeries, QueryError>;
}

/// Source of "today" for clamping ranges and labelling pulls.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}
