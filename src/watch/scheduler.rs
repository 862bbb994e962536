//! Scheduler launching one polling loop per search
//!
//! Loops are started one after another with a fixed stagger delay between
//! launches so that searches do not hit the listing source at the same time.
//! Once started, loops run independently until [`WatchScheduler::shutdown`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::retry::RetryExecutor;
use super::search_loop::{SearchLoop, SearchStatus, StatusMap};
use crate::config::SchedulerConfig;
use crate::dedup::DedupStore;
use crate::models::SearchDefinition;
use crate::otel::Metrics;
use crate::source::SourceFactory;

/// Launches and tracks search loops
pub struct WatchScheduler {
    config: SchedulerConfig,
    retry: RetryExecutor,
    dedup: Arc<dyn DedupStore>,
    sources: Arc<dyn SourceFactory>,
    metrics: Arc<Metrics>,
    status: StatusMap,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl WatchScheduler {
    /// Create a new scheduler
    ///
    /// # Arguments
    ///
    /// * `config` - Scheduler configuration
    /// * `retry` - Retry executor shared by every loop
    /// * `dedup` - Dedup store shared by every loop
    /// * `sources` - Factory building each loop's listing source
    pub fn new(
        config: SchedulerConfig,
        retry: RetryExecutor,
        dedup: Arc<dyn DedupStore>,
        sources: Arc<dyn SourceFactory>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            retry,
            dedup,
            sources,
            metrics: Arc::new(Metrics::noop()),
            status: StatusMap::default(),
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Record loop metrics to the given instruments
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Launch one loop per search definition
    ///
    /// Returns `false` without launching anything when `searches` is empty.
    /// Waits `stagger_secs` between two launches. A search whose source
    /// cannot be built is logged and skipped.
    pub async fn start(&mut self, searches: Vec<SearchDefinition>) -> bool {
        if searches.is_empty() {
            warn!("No searches configured, nothing to watch");
            return false;
        }

        let stagger = Duration::from_secs(self.config.stagger_secs);
        info!(
            searches = searches.len(),
            stagger_secs = self.config.stagger_secs,
            "Starting search loops"
        );

        let total = searches.len();
        for (index, search) in searches.into_iter().enumerate() {
            self.launch(search).await;

            if index + 1 < total && !stagger.is_zero() {
                debug!(delay_secs = stagger.as_secs(), "Waiting before next launch");
                tokio::time::sleep(stagger).await;
            }
        }

        info!(running = self.handles.len(), "Search loops started");
        true
    }

    async fn launch(&mut self, search: SearchDefinition) {
        let name = search.name.clone();

        let source = match self.sources.source_for(&search) {
            Ok(source) => source,
            Err(err) => {
                error!(search = %name, error = %err, "Failed to create listing source");
                let mut status = self.status.write().await;
                status.entry(name).or_default().last_error = Some(err.to_string());
                return;
            }
        };

        self.status
            .write()
            .await
            .entry(name.clone())
            .or_insert_with(SearchStatus::default);

        let search_loop = Arc::new(
            SearchLoop::new(search, source, Arc::clone(&self.dedup), self.retry.clone())
                .with_metrics(Arc::clone(&self.metrics))
                .with_status(Arc::clone(&self.status)),
        );

        let shutdown_rx = self.shutdown_tx.subscribe();
        self.handles
            .push(tokio::spawn(search_loop.run(shutdown_rx)));

        debug!(search = %name, "Search loop launched");
    }

    /// Get the current status of every launched search
    pub async fn status(&self) -> HashMap<String, SearchStatus> {
        self.status.read().await.clone()
    }

    /// Number of loops launched
    pub fn running(&self) -> usize {
        self.handles.len()
    }

    /// Signal every loop to stop and wait for them to finish
    pub async fn shutdown(self) {
        info!(loops = self.handles.len(), "Stopping search loops");
        let _ = self.shutdown_tx.send(());

        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(error = %err, "Search loop ended abnormally");
            }
        }

        info!("Search loops stopped");
    }
}
