//! Google Trends through SerpApi.
//!
//! Maps HTTP and API-level failures onto the fetch contract:
//! 429, 5xx, timeouts and connection errors are transient; other 4xx and
//! API errors are fatal; an empty timeline is `Empty`.

use crate::fetcher::{FetchWindow, TimeSeriesFetcher};
use crate::metrics::{FetchMetrics, MetricsCollector, RequestMetrics, RequestOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use trendscout_core::{CoreError, FetchError, Keyword, RawSeries, RelatedQueries, SeriesPoint};

const SERPAPI_BASE: &str = "https://serpapi.com/search.json";
const RELATED_LIMIT: usize = 5;
const NO_RESULTS_MARKER: &str = "hasn't returned any results";

#[derive(Debug, Clone, Deserialize)]
pub struct TimeseriesResponse {
    pub error: Option<String>,
    pub interest_over_time: Option<InterestOverTime>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterestOverTime {
    #[serde(default)]
    pub timeline_data: Vec<TimelinePoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelinePoint {
    pub date: Option<String>,
    pub timestamp: String,
    #[serde(default)]
    pub values: Vec<TimelineValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelineValue {
    pub query: Option<String>,
    pub value: Option<String>,
    pub extracted_value: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelatedQueriesResponse {
    pub error: Option<String>,
    pub related_queries: Option<RelatedQueriesData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelatedQueriesData {
    #[serde(default)]
    pub top: Vec<RelatedQuery>,
    #[serde(default)]
    pub rising: Vec<RelatedQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelatedQuery {
    pub query: String,
}

#[derive(Debug)]
pub struct SerpApiFetcher {
    http_client: Client,
    api_key: String,
    geo: String,
    base_url: String,
    metrics: MetricsCollector,
}

impl SerpApiFetcher {
    pub fn new(api_key: String, geo: String, timeout: Duration) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(concat!("trendscout/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            api_key,
            geo,
            base_url: SERPAPI_BASE.to_string(),
            metrics: MetricsCollector::new(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// One GET against the Google Trends engine. Returns the raw body on a
    /// 2xx response.
    async fn request(
        &self,
        data_type: &str,
        keyword: &Keyword,
        date: Option<&str>,
    ) -> (Option<u16>, Result<String, FetchError>) {
        let mut params = vec![
            ("engine", "google_trends"),
            ("q", keyword.term.as_str()),
            ("geo", self.geo.as_str()),
            ("data_type", data_type),
            ("api_key", self.api_key.as_str()),
        ];
        if let Some(date) = date {
            params.push(("date", date));
        }

        debug!("SerpApi {} request for '{}'", data_type, keyword.term);
        let response = match self.http_client.get(&self.base_url).query(&params).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Network error for '{}': {}", keyword.term, e);
                return (None, Err(classify_network_error(&e)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return (Some(status.as_u16()), Err(classify_status(status, retry_after)));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return (Some(status.as_u16()), Err(classify_network_error(&e))),
        };
        (Some(status.as_u16()), Ok(body))
    }

    async fn record<T>(
        &self,
        data_type: &str,
        started: Instant,
        status_code: Option<u16>,
        result: &Result<T, FetchError>,
    ) {
        self.metrics
            .record_request(RequestMetrics {
                data_type: data_type.to_string(),
                status_code,
                response_time: started.elapsed(),
                outcome: RequestOutcome::from_result(result),
            })
            .await;
    }
}

#[async_trait]
impl TimeSeriesFetcher for SerpApiFetcher {
    async fn fetch(&self, keyword: &Keyword, window: FetchWindow) -> Result<RawSeries, FetchError> {
        let started = Instant::now();
        let (status_code, body) = self
            .request("TIMESERIES", keyword, Some(window.trends_date_range()))
            .await;
        let result = body.and_then(|body| parse_timeseries(&body));

        if let Err(FetchError::Fatal { reason }) = &result {
            error!("SerpApi rejected '{}': {}", keyword.term, reason);
        }
        self.record("TIMESERIES", started, status_code, &result).await;
        result
    }

    async fn related(&self, keyword: &Keyword) -> Result<RelatedQueries, FetchError> {
        let started = Instant::now();
        let (status_code, body) = self.request("RELATED_QUERIES", keyword, None).await;
        let result = body.and_then(|body| parse_related(&body));

        self.record("RELATED_QUERIES", started, status_code, &result).await;
        result
    }

    async fn metrics(&self) -> Option<FetchMetrics> {
        Some(self.metrics.snapshot().await)
    }

    fn name(&self) -> &'static str {
        "serpapi"
    }
}

pub fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> FetchError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        FetchError::Transient {
            reason: "HTTP 429 rate limited".to_string(),
            retry_after,
        }
    } else if status.is_server_error() {
        FetchError::Transient {
            reason: format!("HTTP {}", status.as_u16()),
            retry_after,
        }
    } else {
        FetchError::fatal(format!("HTTP {}", status.as_u16()))
    }
}

fn classify_network_error(error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::transient("request timed out")
    } else if error.is_connect() || error.is_request() || error.is_body() {
        FetchError::transient(format!("network error: {}", error))
    } else {
        FetchError::fatal(format!("request failed: {}", error))
    }
}

/// API-level error messages arrive with a 200 status.
fn classify_api_error(message: &str) -> FetchError {
    if message.contains(NO_RESULTS_MARKER) {
        FetchError::Empty
    } else if message.to_lowercase().contains("rate") {
        FetchError::transient(message.to_string())
    } else {
        FetchError::fatal(message.to_string())
    }
}

pub fn parse_timeseries(body: &str) -> Result<RawSeries, FetchError> {
    let response: TimeseriesResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::transient(format!("unreadable response: {}", e)))?;

    if let Some(message) = response.error {
        return Err(classify_api_error(&message));
    }

    let timeline = response
        .interest_over_time
        .map(|iot| iot.timeline_data)
        .unwrap_or_default();

    let points: Vec<SeriesPoint> = timeline
        .iter()
        .filter_map(|point| {
            let timestamp = point
                .timestamp
                .parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))?;
            let value = point.values.first().and_then(|v| {
                v.extracted_value
                    .filter(|value| value.is_finite())
                    .or_else(|| v.value.as_deref().and_then(parse_interest_value))
            })?;
            Some(SeriesPoint { timestamp, value })
        })
        .collect();

    if points.is_empty() {
        return Err(FetchError::Empty);
    }
    Ok(RawSeries::new(points))
}

/// Google Trends renders values below 1 as "<1".
fn parse_interest_value(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.starts_with('<') {
        return Some(0.0);
    }
    raw.parse::<f64>().ok().filter(|value| value.is_finite())
}

pub fn parse_related(body: &str) -> Result<RelatedQueries, FetchError> {
    let response: RelatedQueriesResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::transient(format!("unreadable response: {}", e)))?;

    if let Some(message) = response.error {
        return match classify_api_error(&message) {
            FetchError::Empty => Ok(RelatedQueries::default()),
            other => Err(other),
        };
    }

    let data = response.related_queries.unwrap_or_default();
    let take = |queries: Vec<RelatedQuery>| -> Vec<String> {
        queries
            .into_iter()
            .map(|q| q.query)
            .filter(|q| !q.trim().is_empty())
            .take(RELATED_LIMIT)
            .collect()
    };

    Ok(RelatedQueries {
        top: take(data.top),
        rising: take(data.rising),
    })
}
