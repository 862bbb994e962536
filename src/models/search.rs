//! Search definition model
//!
//! A search definition is the immutable unit the scheduler hands to each
//! polling loop.

use std::sync::Arc;
use std::time::Duration;

use crate::config::SearchConfig;
use crate::error::HandlerError;
use crate::handlers::{build_handler, Handler};

use super::SearchQuery;

/// One configured search, owned by exactly one polling loop
#[derive(Clone)]
pub struct SearchDefinition {
    /// Unique name
    pub name: String,

    /// Query parameters passed to the listing source
    pub query: SearchQuery,

    /// Target time between the starts of two consecutive polls
    pub poll_interval: Duration,

    /// Handler invoked for every new listing
    pub handler: Arc<dyn Handler>,

    /// Optional proxy URL for the source client
    pub proxy: Option<String>,
}

impl SearchDefinition {
    /// Create a definition with an empty query and no proxy
    pub fn new(name: impl Into<String>, poll_interval: Duration, handler: Arc<dyn Handler>) -> Self {
        Self {
            name: name.into(),
            query: SearchQuery::new(),
            poll_interval,
            handler,
            proxy: None,
        }
    }

    /// Set the query parameters
    pub fn with_query(mut self, query: SearchQuery) -> Self {
        self.query = query;
        self
    }

    /// Set the proxy URL
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Build a definition from its configuration entry
    pub fn from_config(config: &SearchConfig) -> Result<Self, HandlerError> {
        Ok(Self {
            name: config.name.clone(),
            query: config.parameters.clone(),
            poll_interval: Duration::from_secs(config.delay_secs),
            handler: build_handler(&config.handler)?,
            proxy: config.proxy.clone(),
        })
    }
}

impl std::fmt::Debug for SearchDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchDefinition")
            .field("name", &self.name)
            .field("query", &self.query)
            .field("poll_interval", &self.poll_interval)
            .field("handler", &self.handler.kind())
            .field("proxy", &self.proxy)
            .finish()
    }
}
