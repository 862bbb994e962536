//! Listing sources
//!
//! A listing source answers one search query with the current listings,
//! newest first. Each search loop owns its own source so that per-search
//! client settings (proxy) stay isolated.

pub mod http;

pub use http::HttpListingSource;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::SourceConfig;
use crate::error::FetchError;
use crate::models::{SearchDefinition, SearchQuery, SearchResponse, Sort};

/// Fetch operation consumed by the search loops
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Run a query and return the matching listings
    async fn search(&self, query: &SearchQuery, sort: Sort) -> Result<SearchResponse, FetchError>;
}

/// Builds the listing source used by one search
pub trait SourceFactory: Send + Sync {
    /// Create a source configured for the given search
    fn source_for(&self, search: &SearchDefinition) -> Result<Arc<dyn ListingSource>, FetchError>;
}

/// Factory producing [`HttpListingSource`]s that share one endpoint configuration
#[derive(Debug, Clone)]
pub struct HttpSourceFactory {
    config: SourceConfig,
}

impl HttpSourceFactory {
    /// Create a factory from the source configuration
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }
}

impl SourceFactory for HttpSourceFactory {
    fn source_for(&self, search: &SearchDefinition) -> Result<Arc<dyn ListingSource>, FetchError> {
        let source = HttpListingSource::new(self.config.clone(), search.proxy.as_deref())?;
        Ok(Arc::new(source))
    }
}
