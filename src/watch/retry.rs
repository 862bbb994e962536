//! Retry executor for listing handlers
//!
//! Runs a search's handler against one listing with a bounded number of
//! attempts and exponential backoff between them. Handler errors and panics
//! never escape; the caller only learns whether delivery succeeded.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::RetryConfig;
use crate::error::HandlerError;
use crate::models::{Listing, SearchDefinition};
use crate::otel::Metrics;

/// Outcome of one delivery sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Whether some attempt succeeded
    pub delivered: bool,
    /// Number of handler invocations made
    pub attempts: u32,
    /// Sum of the backoff waits between attempts
    pub total_backoff: Duration,
}

/// Retry executor with exponential backoff
#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    metrics: Arc<Metrics>,
}

impl RetryExecutor {
    /// Create a new RetryExecutor with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(Metrics::noop()),
        }
    }

    /// Create a RetryExecutor with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Report handler failures to the given metrics
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Deliver a listing, returning `true` once any attempt succeeds
    pub async fn execute_with_retry(&self, search: &SearchDefinition, listing: &Listing) -> bool {
        self.deliver(search, listing).await.delivered
    }

    /// Deliver a listing and report how many attempts it took
    ///
    /// The handler is invoked at most `max_attempts` times. After failed
    /// attempt `n` (when not the last) the executor waits
    /// [`calculate_backoff(n)`](Self::calculate_backoff) before trying again.
    /// A panicking handler counts as a failed attempt.
    pub async fn deliver(&self, search: &SearchDefinition, listing: &Listing) -> DeliveryOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let mut outcome = DeliveryOutcome::default();

        for attempt in 1..=max_attempts {
            outcome.attempts = attempt;

            let result = AssertUnwindSafe(search.handler.handle(listing, &search.name))
                .catch_unwind()
                .await;

            let err = match result {
                Ok(Ok(())) => {
                    debug!(
                        search = %search.name,
                        listing_id = %listing.id,
                        attempt = attempt,
                        "Listing delivered"
                    );
                    outcome.delivered = true;
                    return outcome;
                }
                Ok(Err(err)) => err,
                Err(panic) => HandlerError::Failed(format!(
                    "handler panicked: {}",
                    panic_message(panic.as_ref())
                )),
            };

            self.metrics.record_handler_failure(&search.name);

            if attempt == max_attempts {
                error!(
                    search = %search.name,
                    listing_id = %listing.id,
                    attempts = attempt,
                    error = %err,
                    "Handler failed, giving up"
                );
                break;
            }

            let backoff = self.calculate_backoff(attempt);
            warn!(
                search = %search.name,
                listing_id = %listing.id,
                attempt = attempt,
                max_attempts = max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Handler failed, retrying"
            );

            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
            outcome.total_backoff += backoff;
        }

        outcome
    }

    /// Backoff to wait after failed attempt `attempt` (1-indexed)
    ///
    /// `initial_backoff * 2^(attempt - 1)`, saturating on overflow.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        Duration::from_millis(self.config.initial_backoff_ms.saturating_mul(factor))
    }

    /// Get the retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
