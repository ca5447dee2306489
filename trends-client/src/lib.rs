pub mod fetcher;
pub mod fixture;
pub mod metrics;
pub mod rate_limiter;
pub mod serpapi;

pub use fetcher::{FetchWindow, TimeSeriesFetcher};
pub use fixture::FixtureFetcher;
pub use metrics::{FetchMetrics, MetricsCollector};
pub use rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
pub use serpapi::SerpApiFetcher;
