//! Single-query fetch with backoff on throttling and paced completion.
//!
//! - **Backoff**: a retryable error sleeps `base_delay + increment * attempt`
//!   and re-issues the same timeframe. The attempt counter never resets within
//!   one fetch. By default there is no ceiling; a [`RetryPolicy`] may cap the
//!   attempt count or the total time spent waiting.
//! - **Pacing**: after every success the fetcher sleeps a random delay in
//!   `[0, pace)` seconds (tenth-of-a-second steps) so that a long sequence of
//!   chunk fetches does not itself trip the limiter.
//! - **Fatal errors** propagate on first sight, without retry.

use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};

use super::{QueryClient, QueryError};
use crate::engine::types::{Chunk, QuerySpec, TimeSeries};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub increment: Duration,
    /// Total query attempts allowed per fetch; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Upper bound on time spent in one fetch, waits included; `None` is unbounded.
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            increment: Duration::from_secs(5),
            max_attempts: None,
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    /// Wait before the retry following the `attempt`th failure (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay + self.increment * attempt
    }

    fn permits(&self, failed_attempts: u32, elapsed_after_wait: Duration) -> bool {
        if self.max_attempts.is_some_and(|max| failed_attempts >= max) {
            return false;
        }
        if self.max_elapsed.is_some_and(|max| elapsed_after_wait > max) {
            return false;
        }
        true
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("gave up on {timeframe} after {attempts} throttled attempts: {last}")]
    Exhausted {
        timeframe: Chunk,
        attempts: u32,
        last: QueryError,
    },
    #[error(transparent)]
    Fatal(#[from] QueryError),
}

/// Owns the query session and issues one logical query at a time.
pub struct RateLimitedFetcher {
    client: Box<dyn QueryClient>,
    policy: RetryPolicy,
    pace_secs: f64,
    requests: u32,
}

impl RateLimitedFetcher {
    pub fn new(client: Box<dyn QueryClient>, policy: RetryPolicy, pace_secs: f64) -> Self {
        Self {
            client,
            policy,
            pace_secs,
            requests: 0,
        }
    }

    /// Query calls issued so far, retries included.
    pub fn requests(&self) -> u32 {
        self.requests
    }

    pub async fn fetch(
        &mut self,
        spec: &QuerySpec,
        timeframe: &Chunk,
    ) -> Result<TimeSeries, FetchError> {
        let started = Instant::now();
        let mut attempts: u32 = 0;
        loop {
            self.requests += 1;
            match self.client.query(spec, timeframe).await {
                Ok(series) => {
                    pace(self.pace_secs).await;
                    return Ok(series);
                }
                Err(err) if err.is_retryable() => {
                    let wait = self.policy.delay_for(attempts);
                    attempts += 1;
                    if !self.policy.permits(attempts, started.elapsed() + wait) {
                        tracing::warn!(
                            "Giving up on {}/{} {timeframe} after {attempts} attempts: {err}",
                            spec.keyword,
                            spec.geo
                        );
                        return Err(FetchError::Exhausted {
                            timeframe: *timeframe,
                            attempts,
                            last: err,
                        });
                    }
                    tracing::warn!(
                        "{err}; trying {timeframe} again in {}s (attempt {attempts})",
                        wait.as_secs_f64()
                    );
                    sleep(wait).await;
                }
                Err(err) => return Err(FetchError::Fatal(err)),
            }
        }
    }
}

/// Sleep a random whole number of tenths of a second below `pace_secs`.
async fn pace(pace_secs: f64) {
    let tenths = (pace_secs * 10.0).floor();
    if tenths.is_nan() || tenths < 1.0 {
        return;
    }
    let jitter = rand::rng().random_range(0..tenths as u64);
    let delay = Duration::from_millis(jitter * 100);
    tracing::debug!("Pacing {}ms before next query", delay.as_millis());
    sleep(delay).await;
}
