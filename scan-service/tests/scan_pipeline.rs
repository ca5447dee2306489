use async_trait::async_trait;
use checkpoint_store::{CheckpointStore, JsonlCheckpoint};
use chrono::{DateTime, TimeZone, Utc};
use scan_service::{ScanOrchestrator, ScanOutcome, ScanReport};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use trends_client::{FetchWindow, FixtureFetcher, TimeSeriesFetcher};
use trendscout_core::{
    CheckpointError, CoreError, FetchError, Keyword, RawSeries, ScanConfig, ScanStatus,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
}

fn series(points: &[(i64, f64)]) -> RawSeries {
    RawSeries::from_pairs(
        points
            .iter()
            .map(|(days_ago, value)| (now() - chrono::Duration::days(*days_ago), *value)),
    )
}

fn temp_checkpoint() -> PathBuf {
    env::temp_dir().join(format!("test_scan_{}.jsonl", uuid::Uuid::new_v4()))
}

fn test_config(path: &Path) -> ScanConfig {
    let mut config = ScanConfig::default();
    config.rate_limit.jitter_factor = 0.0;
    config.fetch.include_related = false;
    config.checkpoint.archive_on_complete = false;
    config.checkpoint.path = path.to_path_buf();
    config
}

fn keywords() -> Vec<Keyword> {
    vec![
        Keyword::new("gua sha", "natural_beauty"),
        Keyword::new("berberine", "supplements"),
        Keyword::new("zinc", "supplements"),
        Keyword::new("sea moss", "supplements"),
        Keyword::new("castor oil pack", "gut_health"),
        Keyword::new("tallow balm", "natural_beauty"),
    ]
}

fn frozen_upstream() -> FixtureFetcher {
    FixtureFetcher::new()
        .with_series(
            "gua sha",
            series(&[(1825, 5.0), (365, 20.0), (30, 60.0), (0, 95.0)]),
        )
        .with_series("berberine", series(&[(30, 10.0), (0, 80.0)]))
        .with_series("zinc", series(&[(365, 50.0), (30, 52.0), (0, 55.0)]))
        .with_series("castor oil pack", series(&[(1825, 0.0), (0, 40.0)]))
        .with_series("tallow balm", series(&[(90, 10.0), (0, 50.0)]))
    // "sea moss" is unknown to the fixture and comes back empty
}

fn completed(outcome: ScanOutcome) -> ScanReport {
    match outcome {
        ScanOutcome::Completed(report) => report,
        other => panic!("expected a completed scan, got {:?}", other),
    }
}

fn ranking(report: &ScanReport) -> Vec<(String, f64)> {
    report
        .ranked
        .iter()
        .map(|r| (r.keyword.clone(), r.score.unwrap_or(f64::NAN)))
        .collect()
}

/// Signals shutdown right after the n-th fetch returns.
struct AbortAfter {
    inner: FixtureFetcher,
    fetches: u32,
    calls: AtomicU32,
    abort: watch::Sender<bool>,
}

#[async_trait]
impl TimeSeriesFetcher for AbortAfter {
    async fn fetch(&self, keyword: &Keyword, window: FetchWindow) -> Result<RawSeries, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self.inner.fetch(keyword, window).await;
        if n == self.fetches {
            let _ = self.abort.send(true);
        }
        outcome
    }

    fn name(&self) -> &'static str {
        "abort-after"
    }
}

/// Records how many lines the checkpoint file holds each time a fetch starts.
struct CheckpointLineWatcher {
    inner: FixtureFetcher,
    path: PathBuf,
    lines_seen: Mutex<Vec<usize>>,
}

impl CheckpointLineWatcher {
    fn lines_seen(&self) -> Vec<usize> {
        self.lines_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TimeSeriesFetcher for CheckpointLineWatcher {
    async fn fetch(&self, keyword: &Keyword, window: FetchWindow) -> Result<RawSeries, FetchError> {
        let lines = std::fs::read_to_string(&self.path)
            .map(|raw| raw.lines().count())
            .unwrap_or(0);
        self.lines_seen.lock().unwrap().push(lines);
        self.inner.fetch(keyword, window).await
    }

    fn name(&self) -> &'static str {
        "line-watcher"
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_scan_ranks_passing_keywords() {
    let path = temp_checkpoint();
    let config = test_config(&path);
    let (_tx, rx) = watch::channel(false);

    let mut orchestrator =
        ScanOrchestrator::from_config(&config, frozen_upstream(), JsonlCheckpoint::new(&path), rx);
    let report = completed(orchestrator.run(&keywords()).await.unwrap());

    let names: Vec<String> = ranking(&report).into_iter().map(|(k, _)| k).collect();
    assert_eq!(
        names,
        vec!["castor oil pack", "berberine", "gua sha", "tallow balm"]
    );
    assert_eq!(report.ranked[0].score, Some(10_000.0));
    assert_eq!(report.status_counts.ok, 5);
    assert_eq!(report.status_counts.empty, 1);
    assert_eq!(report.scanned_this_run, 6);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.by_category[0].category, "gut_health");
    assert_eq!(report.by_category[1].category, "supplements");
    assert_eq!(
        report.by_category[2].keywords,
        vec!["gua sha", "tallow balm"]
    );

    let _ = std::fs::remove_file(path);
}

#[tokio::test(start_paused = true)]
async fn test_empty_keyword_logged_but_not_ranked() {
    let path = temp_checkpoint();
    let config = test_config(&path);
    let (_tx, rx) = watch::channel(false);

    let mut orchestrator =
        ScanOrchestrator::from_config(&config, frozen_upstream(), JsonlCheckpoint::new(&path), rx);
    let report = completed(orchestrator.run(&keywords()).await.unwrap());
    assert!(report.ranked.iter().all(|r| r.keyword != "sea moss"));

    let log = orchestrator.store_mut().read_all().await.unwrap();
    let sea_moss = log.iter().find(|r| r.keyword == "sea moss").unwrap();
    assert_eq!(sea_moss.status, ScanStatus::Empty);
    assert_eq!(sea_moss.current_interest, None);
    assert_eq!(sea_moss.score, None);
    assert!(!sea_moss.passes_threshold);

    let _ = std::fs::remove_file(path);
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_interrupt_matches_uninterrupted_run() {
    // Reference: one uninterrupted run
    let reference_path = temp_checkpoint();
    let (_tx, rx) = watch::channel(false);
    let mut reference = ScanOrchestrator::from_config(
        &test_config(&reference_path),
        frozen_upstream(),
        JsonlCheckpoint::new(&reference_path),
        rx,
    );
    let expected = ranking(&completed(reference.run(&keywords()).await.unwrap()));

    // Interrupted after three keywords
    let path = temp_checkpoint();
    let config = test_config(&path);
    let (abort_tx, abort_rx) = watch::channel(false);
    let fetcher = AbortAfter {
        inner: frozen_upstream(),
        fetches: 3,
        calls: AtomicU32::new(0),
        abort: abort_tx,
    };
    let mut first_run =
        ScanOrchestrator::from_config(&config, fetcher, JsonlCheckpoint::new(&path), abort_rx);
    match first_run.run(&keywords()).await.unwrap() {
        ScanOutcome::Interrupted { scanned, remaining } => {
            assert_eq!(scanned, 3);
            assert_eq!(remaining, 3);
        }
        other => panic!("expected interruption, got {:?}", other),
    }
    drop(first_run);

    // Resume on the same checkpoint
    let (_tx, rx) = watch::channel(false);
    let mut second_run =
        ScanOrchestrator::from_config(&config, frozen_upstream(), JsonlCheckpoint::new(&path), rx);
    let report = completed(second_run.run(&keywords()).await.unwrap());

    assert_eq!(report.skipped, 3);
    assert_eq!(report.scanned_this_run, 3);
    assert_eq!(second_run.fetcher().calls("gua sha"), 0);
    assert_eq!(second_run.fetcher().calls("berberine"), 0);
    assert_eq!(second_run.fetcher().calls("zinc"), 0);
    assert_eq!(second_run.fetcher().total_calls(), 3);

    let actual = ranking(&report);
    assert_eq!(actual.len(), expected.len());
    for ((name, score), (expected_name, expected_score)) in actual.iter().zip(&expected) {
        assert_eq!(name, expected_name);
        assert!((score - expected_score).abs() < 1e-9);
    }

    let log = second_run.store_mut().read_all().await.unwrap();
    assert_eq!(log.len(), 6);

    let _ = std::fs::remove_file(reference_path);
    let _ = std::fs::remove_file(path);
}

#[tokio::test(start_paused = true)]
async fn test_requests_are_spaced_by_min_interval() {
    let path = temp_checkpoint();
    let config = test_config(&path);
    let (_tx, rx) = watch::channel(false);
    let start = Instant::now();

    let mut orchestrator =
        ScanOrchestrator::from_config(&config, frozen_upstream(), JsonlCheckpoint::new(&path), rx);
    completed(orchestrator.run(&keywords()[..3]).await.unwrap());

    let elapsed = Instant::now() - start;
    assert!(elapsed >= Duration::from_secs(36), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(37), "elapsed {:?}", elapsed);
    assert_eq!(orchestrator.limiter().status().requests_made, 3);

    let _ = std::fs::remove_file(path);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_is_rate_limited_status() {
    let path = temp_checkpoint();
    let config = test_config(&path);
    let (_tx, rx) = watch::channel(false);
    let fetcher = frozen_upstream().with_script(
        "gua sha",
        vec![Err(FetchError::transient("HTTP 429 Too Many Requests"))],
    );
    let start = Instant::now();

    let mut orchestrator =
        ScanOrchestrator::from_config(&config, fetcher, JsonlCheckpoint::new(&path), rx);
    let report = completed(orchestrator.run(&keywords()[..2]).await.unwrap());

    assert_eq!(orchestrator.fetcher().calls("gua sha"), 3);
    assert_eq!(report.status_counts.rate_limited_exhausted, 1);
    assert_eq!(report.status_counts.ok, 1);

    // 45s and 90s backoffs between attempts, then 180s before the next keyword
    assert!(Instant::now() - start >= Duration::from_secs(315));

    let log = orchestrator.store_mut().read_all().await.unwrap();
    let blocked = &log[0];
    assert_eq!(blocked.status, ScanStatus::RateLimitedExhausted);
    assert_eq!(blocked.attempts, 3);
    assert!(blocked.error.as_deref().unwrap().contains("Max retries"));
    assert_eq!(orchestrator.limiter().penalty_level(), 0);

    let _ = std::fs::remove_file(path);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_then_success() {
    let path = temp_checkpoint();
    let config = test_config(&path);
    let (_tx, rx) = watch::channel(false);
    let fetcher = FixtureFetcher::new().with_script(
        "berberine",
        vec![
            Err(FetchError::Transient {
                reason: "HTTP 503".to_string(),
                retry_after: Some(Duration::from_secs(120)),
            }),
            Ok(series(&[(30, 10.0), (0, 80.0)])),
        ],
    );
    let start = Instant::now();

    let mut orchestrator =
        ScanOrchestrator::from_config(&config, fetcher, JsonlCheckpoint::new(&path), rx);
    let report = completed(
        orchestrator
            .run(&[Keyword::new("berberine", "supplements")])
            .await
            .unwrap(),
    );

    assert_eq!(report.ranked.len(), 1);
    assert_eq!(report.ranked[0].attempts, 2);
    // The upstream hint is longer than the 45s base penalty
    assert!(Instant::now() - start >= Duration::from_secs(120));

    let _ = std::fs::remove_file(path);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_is_not_retried() {
    let path = temp_checkpoint();
    let config = test_config(&path);
    let (_tx, rx) = watch::channel(false);
    let fetcher = frozen_upstream().with_script(
        "zinc",
        vec![Err(FetchError::fatal("HTTP 400: invalid query"))],
    );

    let mut orchestrator =
        ScanOrchestrator::from_config(&config, fetcher, JsonlCheckpoint::new(&path), rx);
    let report = completed(orchestrator.run(&keywords()).await.unwrap());

    assert_eq!(orchestrator.fetcher().calls("zinc"), 1);
    assert_eq!(report.status_counts.error, 1);
    // The scan carried on past the failure
    assert_eq!(report.scanned_this_run, 6);

    let log = orchestrator.store_mut().read_all().await.unwrap();
    let zinc = log.iter().find(|r| r.keyword == "zinc").unwrap();
    assert_eq!(zinc.status, ScanStatus::Error);
    assert_eq!(zinc.error.as_deref(), Some("HTTP 400: invalid query"));

    let _ = std::fs::remove_file(path);
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_checkpoint_halts_scan() {
    let path = temp_checkpoint();
    std::fs::write(&path, "{\"keyword\": \"gua sha\", \"categ\n").unwrap();
    let config = test_config(&path);
    let (_tx, rx) = watch::channel(false);

    let mut orchestrator =
        ScanOrchestrator::from_config(&config, frozen_upstream(), JsonlCheckpoint::new(&path), rx);
    let result = orchestrator.run(&keywords()).await;

    assert!(matches!(
        result,
        Err(CoreError::Checkpoint(CheckpointError::Corrupt { .. }))
    ));
    assert_eq!(orchestrator.fetcher().total_calls(), 0);

    let _ = std::fs::remove_file(path);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_before_start_is_resumable() {
    let path = temp_checkpoint();
    let config = test_config(&path);
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let mut orchestrator =
        ScanOrchestrator::from_config(&config, frozen_upstream(), JsonlCheckpoint::new(&path), rx);
    match orchestrator.run(&keywords()).await.unwrap() {
        ScanOutcome::Interrupted { scanned, remaining } => {
            assert_eq!(scanned, 0);
            assert_eq!(remaining, 6);
        }
        other => panic!("expected interruption, got {:?}", other),
    }
    assert_eq!(orchestrator.fetcher().total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_related_queries_and_archive() {
    let path = temp_checkpoint();
    let mut config = test_config(&path);
    config.fetch.include_related = true;
    config.checkpoint.archive_on_complete = true;
    let (_tx, rx) = watch::channel(false);

    let fetcher = FixtureFetcher::new()
        .with_series("berberine", series(&[(30, 10.0), (0, 80.0)]))
        .with_related(
            "berberine",
            trendscout_core::RelatedQueries {
                top: vec!["berberine weight loss".to_string()],
                rising: vec!["berberine vs ozempic".to_string()],
            },
        );

    let mut orchestrator =
        ScanOrchestrator::from_config(&config, fetcher, JsonlCheckpoint::new(&path), rx);
    let report = completed(
        orchestrator
            .run(&[Keyword::new("berberine", "supplements")])
            .await
            .unwrap(),
    );

    assert_eq!(report.ranked[0].related.rising, vec!["berberine vs ozempic"]);
    // Series and related queries each took a rate-limited slot
    assert_eq!(orchestrator.limiter().status().requests_made, 2);

    let archived = report.archived_to.expect("checkpoint archived");
    assert!(!path.exists());
    assert!(PathBuf::from(&archived).exists());

    let _ = std::fs::remove_file(archived);
}

#[tokio::test(start_paused = true)]
async fn test_checkpoint_flushed_every_n_keywords_mid_scan() {
    let path = temp_checkpoint();
    let mut config = test_config(&path);
    config.checkpoint.flush_every = 2;
    let (_tx, rx) = watch::channel(false);
    let fetcher = CheckpointLineWatcher {
        inner: frozen_upstream(),
        path: path.clone(),
        lines_seen: Mutex::new(Vec::new()),
    };

    let mut orchestrator =
        ScanOrchestrator::from_config(&config, fetcher, JsonlCheckpoint::new(&path), rx);
    let report = completed(orchestrator.run(&keywords()[..5]).await.unwrap());

    assert_eq!(report.scanned_this_run, 5);
    assert_eq!(orchestrator.fetcher().lines_seen(), vec![0, 0, 2, 2, 4]);
    let on_disk = std::fs::read_to_string(&path).unwrap();
    assert_eq!(on_disk.lines().count(), 5);

    let _ = std::fs::remove_file(path);
}

#[tokio::test(start_paused = true)]
async fn test_torn_final_checkpoint_line_resumes() {
    let path = temp_checkpoint();
    let config = test_config(&path);

    let (_tx, rx) = watch::channel(false);
    let mut first_run =
        ScanOrchestrator::from_config(&config, frozen_upstream(), JsonlCheckpoint::new(&path), rx);
    completed(first_run.run(&keywords()[..2]).await.unwrap());
    drop(first_run);

    // A flush cut short by a crash
    let mut raw = std::fs::read_to_string(&path).unwrap();
    raw.push_str("{\"keyword\":\"zinc\",\"categ");
    std::fs::write(&path, raw).unwrap();

    let (_tx, rx) = watch::channel(false);
    let mut second_run =
        ScanOrchestrator::from_config(&config, frozen_upstream(), JsonlCheckpoint::new(&path), rx);
    let report = completed(second_run.run(&keywords()[..3]).await.unwrap());

    assert_eq!(report.skipped, 2);
    assert_eq!(report.scanned_this_run, 1);
    assert_eq!(second_run.fetcher().calls("zinc"), 1);
    assert_eq!(second_run.fetcher().total_calls(), 1);

    let log = second_run.store_mut().read_all().await.unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log[2].keyword, "zinc");

    let _ = std::fs::remove_file(path);
}
