//! Listing handlers
//!
//! A handler receives every new listing of a search. Handlers may fail; the
//! retry executor only looks at whether they did.
//!
//! # Built-in handlers
//!
//! - [`LogHandler`]: logs the listing
//! - [`WebhookHandler`]: POSTs the listing as JSON to a URL
//! - [`FnHandler`]: wraps a closure, for embedding the watcher as a library

pub mod log;
pub mod webhook;

pub use self::log::LogHandler;
pub use webhook::WebhookHandler;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::HandlerConfig;
use crate::error::HandlerError;
use crate::models::Listing;

/// Capability invoked for each new listing
#[async_trait]
pub trait Handler: Send + Sync {
    /// Short handler kind, used in logs
    fn kind(&self) -> &'static str;

    /// Deliver one listing found by the named search
    async fn handle(&self, listing: &Listing, search: &str) -> Result<(), HandlerError>;
}

/// Handler backed by a plain closure
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Listing, &str) -> Result<(), HandlerError> + Send + Sync,
{
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&Listing, &str) -> Result<(), HandlerError> + Send + Sync,
{
    fn kind(&self) -> &'static str {
        "fn"
    }

    async fn handle(&self, listing: &Listing, search: &str) -> Result<(), HandlerError> {
        (self.f)(listing, search)
    }
}

/// Build the handler described by a configuration entry
pub fn build_handler(config: &HandlerConfig) -> Result<Arc<dyn Handler>, HandlerError> {
    match config {
        HandlerConfig::Log => Ok(Arc::new(LogHandler)),
        HandlerConfig::Webhook {
            url,
            headers,
            timeout_secs,
        } => Ok(Arc::new(WebhookHandler::new(
            url.clone(),
            headers.clone(),
            std::time::Duration::from_secs(*timeout_secs),
        )?)),
    }
}
