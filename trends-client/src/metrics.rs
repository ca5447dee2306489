use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use trendscout_core::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    Success,
    Empty,
    Transient,
    Fatal,
}

impl RequestOutcome {
    pub fn from_result<T>(result: &Result<T, FetchError>) -> Self {
        match result {
            Ok(_) => RequestOutcome::Success,
            Err(FetchError::Empty) => RequestOutcome::Empty,
            Err(FetchError::Transient { .. }) => RequestOutcome::Transient,
            Err(FetchError::Fatal { .. }) => RequestOutcome::Fatal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestMetrics {
    /// Upstream data type, e.g. `TIMESERIES` or `RELATED_QUERIES`
    pub data_type: String,
    pub status_code: Option<u16>,
    pub response_time: Duration,
    pub outcome: RequestOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataTypeMetrics {
    pub request_count: u64,
    pub success_count: u64,
    pub total_response_time: Duration,
    pub max_response_time: Duration,
}

impl DataTypeMetrics {
    fn update(&mut self, metrics: &RequestMetrics) {
        self.request_count += 1;
        self.total_response_time += metrics.response_time;
        self.max_response_time = self.max_response_time.max(metrics.response_time);
        if metrics.outcome == RequestOutcome::Success {
            self.success_count += 1;
        }
    }

    pub fn average_response_time(&self) -> Duration {
        if self.request_count == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total_response_time.as_nanos() / u128::from(self.request_count);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub empty_responses: u64,
    pub transient_failures: u64,
    pub fatal_failures: u64,
    pub rate_limited_responses: u64,
    pub last_request_time: Option<DateTime<Utc>>,
    pub by_data_type: HashMap<String, DataTypeMetrics>,
}

impl FetchMetrics {
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.transient_failures + self.fatal_failures) as f64 / self.total_requests as f64
        }
    }

    /// Per data type breakdown, sorted by data type name.
    pub fn data_types(&self) -> Vec<(&str, &DataTypeMetrics)> {
        let mut types: Vec<_> = self
            .by_data_type
            .iter()
            .map(|(name, metrics)| (name.as_str(), metrics))
            .collect();
        types.sort_by(|a, b| a.0.cmp(b.0));
        types
    }
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<FetchMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_request(&self, request: RequestMetrics) {
        let mut metrics = self.metrics.write().await;

        metrics.total_requests += 1;
        metrics.last_request_time = Some(Utc::now());

        match request.outcome {
            RequestOutcome::Success => metrics.successful_requests += 1,
            RequestOutcome::Empty => metrics.empty_responses += 1,
            RequestOutcome::Transient => metrics.transient_failures += 1,
            RequestOutcome::Fatal => metrics.fatal_failures += 1,
        }
        if request.status_code == Some(429) {
            metrics.rate_limited_responses += 1;
        }

        metrics
            .by_data_type
            .entry(request.data_type.clone())
            .or_default()
            .update(&request);
    }

    pub async fn snapshot(&self) -> FetchMetrics {
        self.metrics.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(outcome: RequestOutcome, status_code: Option<u16>, millis: u64) -> RequestMetrics {
        RequestMetrics {
            data_type: "TIMESERIES".to_string(),
            status_code,
            response_time: Duration::from_millis(millis),
            outcome,
        }
    }

    #[tokio::test]
    async fn test_metrics_collection() {
        let collector = MetricsCollector::new();

        collector
            .record_request(request(RequestOutcome::Success, Some(200), 150))
            .await;
        collector
            .record_request(request(RequestOutcome::Transient, Some(429), 50))
            .await;

        let metrics = collector.snapshot().await;
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.transient_failures, 1);
        assert_eq!(metrics.rate_limited_responses, 1);
        assert_eq!(metrics.failure_rate(), 0.5);
        assert!(metrics.last_request_time.is_some());

        let series = &metrics.by_data_type["TIMESERIES"];
        assert_eq!(series.request_count, 2);
        assert_eq!(series.average_response_time(), Duration::from_millis(100));
        assert_eq!(series.max_response_time, Duration::from_millis(150));
    }

    #[test]
    fn test_average_response_time_past_u32_requests() {
        let metrics = DataTypeMetrics {
            request_count: u64::from(u32::MAX) + 2,
            success_count: 0,
            total_response_time: Duration::from_millis(2) * u32::MAX,
            max_response_time: Duration::from_millis(5),
        };
        let average = metrics.average_response_time();
        assert!(average < Duration::from_millis(2));
        assert!(average > Duration::from_micros(1999));
    }

    #[test]
    fn test_outcome_from_result() {
        let ok: Result<(), FetchError> = Ok(());
        assert_eq!(RequestOutcome::from_result(&ok), RequestOutcome::Success);

        let empty: Result<(), FetchError> = Err(FetchError::Empty);
        assert_eq!(RequestOutcome::from_result(&empty), RequestOutcome::Empty);

        let fatal: Result<(), FetchError> = Err(FetchError::fatal("HTTP 400"));
        assert_eq!(RequestOutcome::from_result(&fatal), RequestOutcome::Fatal);
    }

    #[tokio::test]
    async fn test_data_types_sorted_by_name() {
        let collector = MetricsCollector::new();
        collector
            .record_request(request(RequestOutcome::Empty, Some(200), 10))
            .await;
        collector
            .record_request(RequestMetrics {
                data_type: "RELATED_QUERIES".to_string(),
                status_code: Some(200),
                response_time: Duration::from_millis(30),
                outcome: RequestOutcome::Success,
            })
            .await;

        let metrics = collector.snapshot().await;
        let names: Vec<&str> = metrics.data_types().iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["RELATED_QUERIES", "TIMESERIES"]);
        assert_eq!(metrics.empty_responses, 1);
        assert_eq!(metrics.failure_rate(), 0.0);
    }
}
