use anyhow::{bail, Context};
use checkpoint_store::{CheckpointStore, JsonlCheckpoint, SqliteCheckpoint};
use scan_service::{ScanOrchestrator, ScanOutcome, ScanReport};
use std::time::Duration;
use tokio::sync::watch;
use trends_client::{FetchMetrics, FixtureFetcher, SerpApiFetcher, TimeSeriesFetcher};
use trendscout_core::{CheckpointBackend, ErrorExt, ScanConfig};

const DEFAULT_CONFIG: &str = "trendscout.toml";
const TOP_N: usize = 25;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "trendscout=info,scan_service=info,trends_client=info,checkpoint_store=info".into()
            }),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = ScanConfig::from_file(&config_path)
        .with_context(|| format!("loading scan config from {}", config_path))?;

    let keywords = config.keyword_set();
    if keywords.is_empty() {
        bail!("{} defines no keywords to scan", config_path);
    }
    tracing::info!(
        "Starting trend scan: {} keywords across {} categories",
        keywords.len(),
        config.keywords.len()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing up and saving the checkpoint");
            let _ = shutdown_tx.send(true);
        }
    });

    let outcome = match std::env::var("TRENDSCOUT_FIXTURE") {
        Ok(fixture) => {
            tracing::info!("Replaying frozen upstream data from {}", fixture);
            let fetcher = FixtureFetcher::from_json_file(&fixture)
                .with_context(|| format!("loading fixture {}", fixture))?;
            run_with_store(&config, fetcher, &keywords, shutdown_rx).await?
        }
        Err(_) => {
            let api_key = std::env::var("SERPAPI_KEY")
                .context("SERPAPI_KEY must be set (or TRENDSCOUT_FIXTURE for offline runs)")?;
            let fetcher = SerpApiFetcher::new(
                api_key,
                config.fetch.geo.clone(),
                Duration::from_secs(config.fetch.request_timeout_secs),
            )?;
            run_with_store(&config, fetcher, &keywords, shutdown_rx).await?
        }
    };

    match outcome {
        ScanOutcome::Completed(report) => print_report(&report),
        ScanOutcome::Interrupted { scanned, remaining } => tracing::info!(
            "Stopped early: {} keywords scanned this run, {} left. Run again to resume.",
            scanned,
            remaining
        ),
    }

    Ok(())
}

async fn run_with_store<F: TimeSeriesFetcher>(
    config: &ScanConfig,
    fetcher: F,
    keywords: &[trendscout_core::Keyword],
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<ScanOutcome> {
    let path = &config.checkpoint.path;
    match config.checkpoint.backend {
        CheckpointBackend::Jsonl => {
            run_scan(config, fetcher, JsonlCheckpoint::new(path), keywords, shutdown).await
        }
        CheckpointBackend::Sqlite => {
            let store = SqliteCheckpoint::open(path)
                .await
                .with_context(|| format!("opening checkpoint database {}", path.display()))?;
            run_scan(config, fetcher, store, keywords, shutdown).await
        }
    }
}

async fn run_scan<F: TimeSeriesFetcher, C: CheckpointStore>(
    config: &ScanConfig,
    fetcher: F,
    store: C,
    keywords: &[trendscout_core::Keyword],
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<ScanOutcome> {
    let mut orchestrator = ScanOrchestrator::from_config(config, fetcher, store, shutdown);
    let outcome = orchestrator.run(keywords).await.map_err(|e| {
        tracing::error!("{}", e.user_friendly_message());
        e
    })?;

    let limiter = orchestrator.limiter().status();
    tracing::info!(
        "{} upstream requests, {} backoffs, {:?} spent waiting on the rate limiter",
        limiter.requests_made,
        limiter.penalties,
        limiter.total_wait
    );
    if let Some(metrics) = orchestrator.fetcher().metrics().await {
        log_fetch_metrics(orchestrator.fetcher().name(), &metrics);
    }
    Ok(outcome)
}

fn log_fetch_metrics(source: &str, metrics: &FetchMetrics) {
    tracing::info!(
        "{} {} requests: {:.1}% failed, {} rate limited (HTTP 429), {} empty",
        metrics.total_requests,
        source,
        metrics.failure_rate() * 100.0,
        metrics.rate_limited_responses,
        metrics.empty_responses
    );
    for (data_type, by_type) in metrics.data_types() {
        tracing::info!(
            "  {}: {} requests, {} ok, avg {:?}, max {:?}",
            data_type,
            by_type.request_count,
            by_type.success_count,
            by_type.average_response_time(),
            by_type.max_response_time
        );
    }
}

fn print_report(report: &ScanReport) {
    let counts = &report.status_counts;
    tracing::info!(
        "{} of {} keywords pass ({} ok, {} empty, {} error, {} rate limited; {} resumed from checkpoint)",
        report.passing_count(),
        report.total_keywords,
        counts.ok,
        counts.empty,
        counts.error,
        counts.rate_limited_exhausted,
        report.skipped
    );

    for (rank, result) in report.top(TOP_N).iter().enumerate() {
        tracing::info!(
            "#{:<3} {:<32} {:<18} score {:>9.1}  interest {:>3.0}  max growth {:>+8.0}%",
            rank + 1,
            result.keyword,
            result.category,
            result.score.unwrap_or_default(),
            result.current_interest.unwrap_or_default(),
            result.max_growth().unwrap_or_default()
        );
        if !result.related.rising.is_empty() {
            tracing::info!("      rising: {}", result.related.rising.join("; "));
        }
    }

    for group in &report.by_category {
        tracing::info!(
            "{}: {} passing ({})",
            group.category,
            group.keywords.len(),
            group.keywords.join(", ")
        );
    }

    if let Some(archived) = &report.archived_to {
        tracing::info!("Checkpoint archived to {}", archived);
    }
}
