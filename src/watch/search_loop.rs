//! Polling loop for a single search
//!
//! Each iteration fetches the newest listings, drops those already delivered,
//! hands the rest to the retry executor and records the ones delivered. The
//! loop then sleeps for whatever is left of the poll interval, or longer when
//! the source asked it to back off.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::retry::RetryExecutor;
use crate::dedup::DedupStore;
use crate::error::FetchError;
use crate::models::{Listing, SearchDefinition, Sort};
use crate::otel::Metrics;
use crate::source::ListingSource;

/// Shared per-search status, keyed by search name
pub type StatusMap = Arc<RwLock<HashMap<String, SearchStatus>>>;

/// Summary of one loop iteration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationReport {
    /// Listings returned by the source
    pub fetched: usize,
    /// Listings not yet delivered
    pub candidates: usize,
    /// Candidates delivered and recorded as seen
    pub delivered: usize,
    /// Fetch failure that ended the iteration early
    pub fetch_error: Option<String>,
    /// Wait requested by a rate-limited source before the next poll
    pub retry_after: Option<Duration>,
}

impl IterationReport {
    /// Candidates that will be offered again next iteration
    pub fn undelivered(&self) -> usize {
        self.candidates.saturating_sub(self.delivered)
    }
}

/// Runtime status of one search
#[derive(Debug, Clone, Default)]
pub struct SearchStatus {
    /// Iterations finished, including failed ones
    pub iterations: u64,
    /// Start of the most recent iteration
    pub last_iteration: Option<SystemTime>,
    /// Report of the most recent completed iteration
    pub last_report: Option<IterationReport>,
    /// Most recent fetch or iteration failure
    pub last_error: Option<String>,
}

/// Time left to sleep once an iteration took `elapsed`
///
/// Never negative: an iteration longer than the poll interval is followed
/// immediately by the next one.
pub fn remaining_delay(poll_interval: Duration, elapsed: Duration) -> Duration {
    poll_interval.saturating_sub(elapsed)
}

/// Polling loop bound to one search definition
pub struct SearchLoop {
    search: SearchDefinition,
    source: Arc<dyn ListingSource>,
    dedup: Arc<dyn DedupStore>,
    retry: RetryExecutor,
    metrics: Arc<Metrics>,
    status: StatusMap,
}

impl SearchLoop {
    /// Create a loop for a search
    pub fn new(
        search: SearchDefinition,
        source: Arc<dyn ListingSource>,
        dedup: Arc<dyn DedupStore>,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            search,
            source,
            dedup,
            retry,
            metrics: Arc::new(Metrics::noop()),
            status: StatusMap::default(),
        }
    }

    /// Record fetches, new listings and deliveries to the given metrics
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Publish iteration reports to a shared status map
    pub fn with_status(mut self, status: StatusMap) -> Self {
        self.status = status;
        self
    }

    /// The search this loop polls
    pub fn search(&self) -> &SearchDefinition {
        &self.search
    }

    /// Run one poll-filter-deliver pass
    pub async fn run_iteration(&self) -> IterationReport {
        let name = self.search.name.as_str();
        let mut report = IterationReport::default();

        let response = match self.source.search(&self.search.query, Sort::Newest).await {
            Ok(response) => {
                self.metrics.record_fetch(name, "ok");
                response
            }
            Err(err) => {
                self.metrics.record_fetch(name, "error");
                error!(search = name, error = %err, "Failed to fetch listings");
                if let FetchError::RateLimited(wait_secs) = &err {
                    report.retry_after = Some(Duration::from_secs(*wait_secs));
                }
                report.fetch_error = Some(err.to_string());
                return report;
            }
        };

        report.fetched = response.listings.len();
        debug!(
            search = name,
            total = response.total,
            fetched = report.fetched,
            "Fetched listings"
        );

        let candidates = self.new_listings(response.listings).await;
        report.candidates = candidates.len();
        if report.candidates > 0 {
            info!(search = name, new = report.candidates, "Found new listings");
            self.metrics
                .record_new_listings(name, report.candidates as u64);
        }

        for listing in &candidates {
            let delivered = self.retry.execute_with_retry(&self.search, listing).await;
            self.metrics.record_delivery(name, delivered);

            if delivered && self.dedup.add_from(name, &listing.id).await {
                report.delivered += 1;
            }
        }

        let undelivered = report.undelivered();
        if undelivered > 0 {
            warn!(
                search = name,
                undelivered = undelivered,
                "Listings were not marked as seen and will be retried"
            );
        }

        report
    }

    /// Listings not yet in the dedup store, in fetch order
    ///
    /// Repeated ids within one response are kept once.
    async fn new_listings(&self, listings: Vec<Listing>) -> Vec<Listing> {
        let mut batch = HashSet::new();
        let mut candidates = Vec::new();

        for listing in listings {
            if batch.contains(&listing.id) || self.dedup.contains(&listing.id).await {
                continue;
            }
            batch.insert(listing.id.clone());
            candidates.push(listing);
        }

        candidates
    }

    /// Poll until the shutdown signal fires
    ///
    /// Each iteration runs in its own task; a panic inside it is logged and
    /// the loop carries on with the next sleep. Shutdown interrupts both the
    /// running iteration and the sleep.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let name = self.search.name.clone();
        let poll_interval = self.search.poll_interval;

        info!(
            search = %name,
            interval_secs = poll_interval.as_secs(),
            "Search loop started"
        );

        loop {
            let started = Instant::now();
            self.mark_started().await;

            let this = Arc::clone(&self);
            let mut iteration = tokio::spawn(async move { this.run_iteration().await });

            let result = tokio::select! {
                result = &mut iteration => result,
                _ = shutdown_rx.recv() => {
                    iteration.abort();
                    let _ = iteration.await;
                    debug!(search = %name, "Iteration interrupted by shutdown");
                    break;
                }
            };

            let elapsed = started.elapsed();
            self.metrics.record_iteration_duration(&name, elapsed);

            let retry_after = match result {
                Ok(report) => {
                    let retry_after = report.retry_after;
                    self.record_report(report).await;
                    retry_after
                }
                Err(err) => {
                    error!(search = %name, error = %err, "Search iteration failed");
                    self.record_failure(err.to_string()).await;
                    None
                }
            };

            let mut delay = remaining_delay(poll_interval, elapsed);
            if let Some(wait) = retry_after {
                delay = delay.max(wait);
            }
            debug!(
                search = %name,
                elapsed_ms = elapsed.as_millis() as u64,
                sleep_ms = delay.as_millis() as u64,
                "Sleeping until next poll"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        info!(search = %name, "Search loop stopped");
    }

    async fn mark_started(&self) {
        let mut status = self.status.write().await;
        let entry = status.entry(self.search.name.clone()).or_default();
        entry.last_iteration = Some(SystemTime::now());
    }

    async fn record_report(&self, report: IterationReport) {
        let mut status = self.status.write().await;
        let entry = status.entry(self.search.name.clone()).or_default();
        entry.iterations += 1;
        if let Some(ref err) = report.fetch_error {
            entry.last_error = Some(err.clone());
        }
        entry.last_report = Some(report);
    }

    async fn record_failure(&self, message: String) {
        let mut status = self.status.write().await;
        let entry = status.entry(self.search.name.clone()).or_default();
        entry.iterations += 1;
        entry.last_error = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::dedup::MockDedupStore;
    use crate::error::{FetchError, HandlerError};
    use crate::handlers::{FnHandler, Handler};
    use crate::models::SearchResponse;
    use crate::source::MockListingSource;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// In-memory dedup store whose `add` can be switched to fail
    #[derive(Default)]
    struct MemoryDedup {
        ids: Mutex<HashSet<String>>,
        fail_adds: bool,
    }

    #[async_trait::async_trait]
    impl DedupStore for MemoryDedup {
        async fn contains(&self, id: &str) -> bool {
            self.ids.lock().unwrap().contains(id)
        }

        async fn add(&self, id: &str) -> bool {
            if self.fail_adds {
                return false;
            }
            self.ids.lock().unwrap().insert(id.to_string());
            true
        }
    }

    /// Handler recording the ids it was called with
    fn recording_handler(seen: Arc<Mutex<Vec<String>>>) -> Arc<dyn Handler> {
        Arc::new(FnHandler::new(move |listing: &Listing, _: &str| {
            seen.lock().unwrap().push(listing.id.clone());
            Ok(())
        }))
    }

    fn source_returning(ids: &'static [&'static str]) -> MockListingSource {
        let mut source = MockListingSource::new();
        source.expect_search().returning(move |_, _| {
            Ok(SearchResponse::from_listings(
                ids.iter().map(|id| Listing::new(*id)).collect(),
            ))
        });
        source
    }

    fn search_loop(
        handler: Arc<dyn Handler>,
        source: MockListingSource,
        dedup: Arc<dyn DedupStore>,
    ) -> SearchLoop {
        SearchLoop::new(
            SearchDefinition::new("test", Duration::from_secs(60), handler),
            Arc::new(source),
            dedup,
            RetryExecutor::new(RetryConfig {
                max_attempts: 3,
                initial_backoff_ms: 0,
            }),
        )
    }

    // Test 1: Already seen listings are never handed to the handler
    #[tokio::test]
    async fn test_seen_listings_are_skipped() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let dedup = Arc::new(MemoryDedup::default());
        dedup.add("a").await;

        let search_loop = search_loop(
            recording_handler(delivered.clone()),
            source_returning(&["a", "b", "c"]),
            dedup.clone(),
        );

        let report = search_loop.run_iteration().await;

        assert_eq!(
            report,
            IterationReport {
                fetched: 3,
                candidates: 2,
                delivered: 2,
                fetch_error: None,
                retry_after: None,
            }
        );
        assert_eq!(*delivered.lock().unwrap(), vec!["b", "c"]);
        assert!(dedup.contains("b").await);
        assert!(dedup.contains("c").await);
    }

    // Test 2: Delivered listings are excluded from later iterations
    #[tokio::test]
    async fn test_delivered_listings_not_redelivered() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let search_loop = search_loop(
            recording_handler(delivered.clone()),
            source_returning(&["a", "b"]),
            Arc::new(MemoryDedup::default()),
        );

        let first = search_loop.run_iteration().await;
        let second = search_loop.run_iteration().await;

        assert_eq!(first.delivered, 2);
        assert_eq!(second.candidates, 0);
        assert_eq!(second.delivered, 0);
        assert_eq!(delivered.lock().unwrap().len(), 2);
    }

    // Test 3: Failed add makes the listing a candidate again
    #[tokio::test]
    async fn test_failed_add_is_retried_next_iteration() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let dedup = Arc::new(MemoryDedup {
            fail_adds: true,
            ..Default::default()
        });
        let search_loop = search_loop(
            recording_handler(delivered.clone()),
            source_returning(&["a"]),
            dedup,
        );

        let first = search_loop.run_iteration().await;
        let second = search_loop.run_iteration().await;

        assert_eq!(first.candidates, 1);
        assert_eq!(first.delivered, 0);
        assert_eq!(first.undelivered(), 1);
        assert_eq!(second.candidates, 1);
        assert_eq!(*delivered.lock().unwrap(), vec!["a", "a"]);
    }

    // Test 4: Handler exhaustion leaves the listing unseen
    #[tokio::test]
    async fn test_exhausted_handler_not_recorded() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let handler: Arc<dyn Handler> = Arc::new(FnHandler::new(move |_: &Listing, _: &str| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::failed("down"))
        }));
        let dedup = Arc::new(MemoryDedup::default());

        let search_loop = search_loop(handler, source_returning(&["x"]), dedup.clone());
        let report = search_loop.run_iteration().await;

        assert_eq!(report.candidates, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!dedup.contains("x").await);
    }

    // Test 5: Fetch error ends the iteration without touching the store
    #[tokio::test]
    async fn test_fetch_error_skips_iteration() {
        let mut source = MockListingSource::new();
        source
            .expect_search()
            .returning(|_, _| Err(FetchError::ServerError(503)));

        let mut dedup = MockDedupStore::new();
        dedup.expect_contains().never();
        dedup.expect_add_from().never();

        let search_loop = search_loop(
            recording_handler(Arc::new(Mutex::new(Vec::new()))),
            source,
            Arc::new(dedup),
        );

        let report = search_loop.run_iteration().await;

        assert_eq!(report.fetched, 0);
        assert_eq!(report.candidates, 0);
        assert_eq!(report.fetch_error, Some("Server error: HTTP 503".to_string()));
        assert_eq!(report.retry_after, None);
    }

    // Test 6: Query is sent newest first
    #[tokio::test]
    async fn test_fetch_uses_query_and_newest_sort() {
        let mut source = MockListingSource::new();
        source
            .expect_search()
            .withf(|query, sort| {
                query.get("text") == Some(&serde_json::json!("lamp")) && *sort == Sort::Newest
            })
            .times(1)
            .returning(|_, _| Ok(SearchResponse::default()));

        let search = SearchDefinition::new(
            "lamps",
            Duration::from_secs(60),
            recording_handler(Arc::new(Mutex::new(Vec::new()))),
        )
        .with_query([("text".to_string(), serde_json::json!("lamp"))].into());

        let search_loop = SearchLoop::new(
            search,
            Arc::new(source),
            Arc::new(MemoryDedup::default()),
            RetryExecutor::with_defaults(),
        );

        assert_eq!(search_loop.run_iteration().await, IterationReport::default());
    }

    // Test 7: Duplicate ids in one response are delivered once
    #[tokio::test]
    async fn test_duplicate_ids_in_batch() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let search_loop = search_loop(
            recording_handler(delivered.clone()),
            source_returning(&["a", "a", "b"]),
            Arc::new(MemoryDedup::default()),
        );

        let report = search_loop.run_iteration().await;

        assert_eq!(report.fetched, 3);
        assert_eq!(report.candidates, 2);
        assert_eq!(*delivered.lock().unwrap(), vec!["a", "b"]);
    }

    // Test 8: Remaining delay is clamped to zero
    #[test]
    fn test_remaining_delay() {
        let interval = Duration::from_secs(60);

        assert_eq!(
            remaining_delay(interval, Duration::from_secs(10)),
            Duration::from_secs(50)
        );
        assert_eq!(remaining_delay(interval, interval), Duration::ZERO);
        assert_eq!(
            remaining_delay(interval, Duration::from_secs(75)),
            Duration::ZERO
        );
    }

    // Test 9: Loop polls once per interval and stops on shutdown
    #[tokio::test(start_paused = true)]
    async fn test_run_polls_every_interval() {
        let fetches = Arc::new(AtomicU32::new(0));
        let fetches_clone = fetches.clone();
        let mut source = MockListingSource::new();
        source.expect_search().returning(move |_, _| {
            fetches_clone.fetch_add(1, Ordering::SeqCst);
            Ok(SearchResponse::default())
        });

        let status = StatusMap::default();
        let search_loop = Arc::new(
            search_loop(
                recording_handler(Arc::new(Mutex::new(Vec::new()))),
                source,
                Arc::new(MemoryDedup::default()),
            )
            .with_status(status.clone()),
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(search_loop.run(shutdown_rx));

        // First poll happens immediately
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // One more poll per 60s interval
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 3);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let status = status.read().await;
        let entry = status.get("test").unwrap();
        assert_eq!(entry.iterations, 3);
        assert!(entry.last_iteration.is_some());
        assert_eq!(entry.last_report, Some(IterationReport::default()));
    }

    /// Source that panics on its first call
    struct PanicOnceSource {
        calls: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl ListingSource for PanicOnceSource {
        async fn search(
            &self,
            _query: &crate::models::SearchQuery,
            _sort: Sort,
        ) -> Result<SearchResponse, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("source exploded");
            }
            Ok(SearchResponse::default())
        }
    }

    // Test 10: A panicking iteration does not stop the loop
    #[tokio::test(start_paused = true)]
    async fn test_panicking_iteration_is_contained() {
        let fetches = Arc::new(AtomicU32::new(0));
        let source = PanicOnceSource {
            calls: fetches.clone(),
        };

        let status = StatusMap::default();
        let search_loop = Arc::new(
            SearchLoop::new(
                SearchDefinition::new(
                    "test",
                    Duration::from_secs(60),
                    recording_handler(Arc::new(Mutex::new(Vec::new()))),
                ),
                Arc::new(source),
                Arc::new(MemoryDedup::default()),
                RetryExecutor::with_defaults(),
            )
            .with_status(status.clone()),
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(search_loop.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 2);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let status = status.read().await;
        let entry = status.get("test").unwrap();
        assert_eq!(entry.iterations, 2);
        assert!(entry.last_error.is_some());
        assert_eq!(entry.last_report, Some(IterationReport::default()));
    }

    // Test 11: Fetch errors are published as the last error
    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_published_to_status() {
        let mut source = MockListingSource::new();
        source
            .expect_search()
            .returning(|_, _| Err(FetchError::NetworkTimeout));

        let status = StatusMap::default();
        let search_loop = Arc::new(
            search_loop(
                recording_handler(Arc::new(Mutex::new(Vec::new()))),
                source,
                Arc::new(MemoryDedup::default()),
            )
            .with_status(status.clone()),
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(search_loop.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let status = status.read().await;
        assert_eq!(
            status.get("test").unwrap().last_error,
            Some("Network timeout".to_string())
        );
    }

    // Test 12: A panicking handler does not block the rest of the batch
    #[tokio::test]
    async fn test_panicking_handler_does_not_block_batch() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = calls.clone();
        let handler: Arc<dyn Handler> = Arc::new(FnHandler::new(move |listing: &Listing, _: &str| {
            calls_clone.lock().unwrap().push(listing.id.clone());
            if listing.id == "a" {
                panic!("cannot handle listing a");
            }
            Ok(())
        }));
        let dedup = Arc::new(MemoryDedup::default());

        let search_loop = search_loop(handler, source_returning(&["a", "b"]), dedup.clone());
        let report = search_loop.run_iteration().await;

        assert_eq!(report.candidates, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(*calls.lock().unwrap(), vec!["a", "a", "a", "b"]);
        assert!(!dedup.contains("a").await);
        assert!(dedup.contains("b").await);
    }

    // Test 13: Rate limiting pushes the next poll past the interval
    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_source_delays_next_poll() {
        let fetches = Arc::new(Mutex::new(Vec::new()));
        let fetches_clone = fetches.clone();
        let mut source = MockListingSource::new();
        source.expect_search().returning(move |_, _| {
            let mut fetches = fetches_clone.lock().unwrap();
            fetches.push(Instant::now());
            if fetches.len() == 1 {
                Err(FetchError::RateLimited(300))
            } else {
                Ok(SearchResponse::default())
            }
        });

        let status = StatusMap::default();
        let search_loop = Arc::new(
            search_loop(
                recording_handler(Arc::new(Mutex::new(Vec::new()))),
                source,
                Arc::new(MemoryDedup::default()),
            )
            .with_status(status.clone()),
        );

        let start = Instant::now();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(search_loop.run(shutdown_rx));

        // The 60s interval alone would have polled again by now
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(fetches.lock().unwrap().len(), 1);

        // Back to the regular interval once the wait is over
        tokio::time::sleep(Duration::from_secs(62)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let offsets: Vec<Duration> = fetches
            .lock()
            .unwrap()
            .iter()
            .map(|at| *at - start)
            .collect();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_secs(300),
                Duration::from_secs(360)
            ]
        );

        let status = status.read().await;
        assert_eq!(
            status.get("test").unwrap().last_error,
            Some("Rate limited, retry after 300 seconds".to_string())
        );
    }

    /// Source whose every fetch takes `delay` and records when it began
    struct SlowSource {
        delay: Duration,
        started: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait::async_trait]
    impl ListingSource for SlowSource {
        async fn search(
            &self,
            _query: &crate::models::SearchQuery,
            _sort: Sort,
        ) -> Result<SearchResponse, FetchError> {
            self.started.lock().unwrap().push(Instant::now());
            tokio::time::sleep(self.delay).await;
            Ok(SearchResponse::default())
        }
    }

    // Test 14: An iteration longer than the interval is followed immediately
    #[tokio::test(start_paused = true)]
    async fn test_slow_iteration_polls_back_to_back() {
        let started = Arc::new(Mutex::new(Vec::new()));
        let source = SlowSource {
            delay: Duration::from_secs(90),
            started: started.clone(),
        };

        let search_loop = Arc::new(SearchLoop::new(
            SearchDefinition::new(
                "test",
                Duration::from_secs(60),
                recording_handler(Arc::new(Mutex::new(Vec::new()))),
            ),
            Arc::new(source),
            Arc::new(MemoryDedup::default()),
            RetryExecutor::with_defaults(),
        ));

        let start = Instant::now();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(search_loop.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(200)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let offsets: Vec<Duration> = started
            .lock()
            .unwrap()
            .iter()
            .map(|at| *at - start)
            .collect();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_secs(90),
                Duration::from_secs(180)
            ]
        );
    }
}
