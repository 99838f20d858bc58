//! Google Trends implementation of the query capability.
//!
//! A query is two round-trips on a cookie-holding session:
//!
//! 1. `explore` returns widget descriptors; the `TIMESERIES` widget carries a
//!    short-lived token plus the canonical request for the timeline.
//! 2. `widgetdata/multiline` returns the timeline itself.
//!
//! Both responses are prefixed with an anti-JSON-hijacking guard (`)]}'`),
//! stripped before parsing. The service picks the granularity from the span:
//! daily up to ~270 days, weekly up to ~5 years, monthly beyond.

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Client, Method};
use serde::Deserialize;
use std::time::Duration;

use super::{QueryClient, QueryError};
use crate::engine::types::{Chunk, QuerySpec, TimeSeries};

const SESSION_URL: &str = "https://trends.google.com/trends/explore";
const EXPLORE_URL: &str = "https://trends.google.com/trends/api/explore";
const MULTILINE_URL: &str = "https://trends.google.com/trends/api/widgetdata/multiline";
const TIMESERIES_WIDGET: &str = "TIMESERIES";

#[derive(Debug, Deserialize)]
struct ExploreResponse {
    widgets: Vec<Widget>,
}

#[derive(Debug, Deserialize)]
struct Widget {
    id: String,
    token: Option<String>,
    request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MultilineResponse {
    default: Timeline,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Timeline {
    #[serde(default)]
    timeline_data: Vec<TimelinePoint>,
}

#[derive(Debug, Deserialize)]
struct TimelinePoint {
    time: String,
    value: Vec<f64>,
}

pub struct GoogleTrendsClient {
    client: Client,
    hl: String,
    session_open: bool,
}

impl GoogleTrendsClient {
    pub fn new(hl: &str, timeout: Duration) -> Result<Self, QueryError> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(Self {
            client,
            hl: hl.to_string(),
            session_open: false,
        })
    }

    /// Visit the explore page once so the session holds the cookies the API expects.
    async fn open_session(&mut self, geo: &str) -> Result<(), QueryError> {
        if self.session_open {
            return Ok(());
        }
        let resp = self
            .client
            .get(SESSION_URL)
            .query(&[("geo", geo)])
            .send()
            .await
            .map_err(transport)?;
        if let Some(err) = classify_status(resp.status().as_u16(), "") {
            return Err(err);
        }
        self.session_open = true;
        Ok(())
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<String, QueryError> {
        let resp = self
            .client
            .request(method, url)
            .query(params)
            .send()
            .await
            .map_err(transport)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(transport)?;
        if let Some(err) = classify_status(status, &body) {
            return Err(err);
        }
        Ok(body)
    }
}

#[async_trait]
impl QueryClient for GoogleTrendsClient {
    async fn query(
        &mut self,
        spec: &QuerySpec,
        timeframe: &Chunk,
    ) -> Result<TimeSeries, QueryError> {
        self.open_session(&spec.geo).await?;
        let tz = spec.tz.to_string();

        let explore = self
            .send(
                Method::POST,
                EXPLORE_URL,
                &[
                    ("hl", self.hl.clone()),
                    ("tz", tz.clone()),
                    ("req", explore_request(spec, timeframe)),
                ],
            )
            .await?;
        let (token, request) = parse_timeseries_widget(&explore)?;

        let body = self
            .send(
                Method::GET,
                MULTILINE_URL,
                &[
                    ("hl", self.hl.clone()),
                    ("tz", tz),
                    ("req", request.to_string()),
                    ("token", token),
                ],
            )
            .await?;
        parse_timeline(&body)
    }
}

fn transport(e: reqwest::Error) -> QueryError {
    QueryError::Transport(e.to_string())
}

/// Map an HTTP status onto the error taxonomy; `None` for success.
fn classify_status(status: u16, body: &str) -> Option<QueryError> {
    match status {
        200..=299 => None,
        429 => Some(QueryError::RateLimited { status }),
        s if s >= 500 => Some(QueryError::Unavailable { status: s }),
        s => Some(QueryError::Rejected {
            status: s,
            message: body.chars().take(200).collect(),
        }),
    }
}

fn explore_request(spec: &QuerySpec, timeframe: &Chunk) -> String {
    serde_json::json!({
        "comparisonItem": [{
            "keyword": spec.keyword,
            "time": timeframe.to_string(),
            "geo": spec.geo,
        }],
        "category": spec.category,
        "property": "",
    })
    .to_string()
}

fn strip_guard(body: &str) -> &str {
    body.find('{').map_or(body, |i| &body[i..])
}

fn parse_timeseries_widget(body: &str) -> Result<(String, serde_json::Value), QueryError> {
    let explore: ExploreResponse = serde_json::from_str(strip_guard(body))
        .map_err(|e| QueryError::Malformed(format!("explore: {e}")))?;
    let widget = explore
        .widgets
        .into_iter()
        .find(|w| w.id == TIMESERIES_WIDGET)
        .ok_or_else(|| QueryError::Malformed("explore: no TIMESERIES widget".into()))?;
    match (widget.token, widget.request) {
        (Some(token), Some(request)) => Ok((token, request)),
        _ => Err(QueryError::Malformed(
            "explore: TIMESERIES widget without token".into(),
        )),
    }
}

fn parse_timeline(body: &str) -> Result<TimeSeries, QueryError> {
    let parsed: MultilineResponse = serde_json::from_str(strip_guard(body))
        .map_err(|e| QueryError::Malformed(format!("multiline: {e}")))?;

    let mut series = TimeSeries::new();
    for point in parsed.default.timeline_data {
        let secs: i64 = point
            .time
            .parse()
            .map_err(|_| QueryError::Malformed(format!("bad timestamp '{}'", point.time)))?;
        let date = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| QueryError::Malformed(format!("timestamp out of range: {secs}")))?
            .date_naive();
        // Single-keyword queries carry exactly one value per point.
        if let Some(value) = point.value.first() {
            series.insert(date, *value);
        }
    }
    Ok(series)
}
