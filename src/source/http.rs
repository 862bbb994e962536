//! JSON-over-HTTP listing source
//!
//! Queries are POSTed as `{"filters": ..., "sort": ..., "limit": ...}` and the
//! source answers with `{"total": ..., "listings": [...]}`.

use async_trait::async_trait;
use reqwest::{Client, Proxy, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::ListingSource;
use crate::config::SourceConfig;
use crate::error::FetchError;
use crate::models::{SearchQuery, SearchResponse, Sort};

/// Request body sent to the search endpoint
#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    filters: &'a SearchQuery,
    sort: Sort,
    limit: u32,
}

/// HTTP listing source
#[derive(Debug, Clone)]
pub struct HttpListingSource {
    client: Client,
    config: SourceConfig,
}

impl HttpListingSource {
    /// Create a source, optionally routed through a proxy
    pub fn new(config: SourceConfig, proxy: Option<&str>) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_tls);

        if let Some(proxy_url) = proxy {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| FetchError::Client(format!("Invalid proxy {proxy_url}: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Create a source with a custom reqwest Client
    pub fn with_client(client: Client, config: SourceConfig) -> Self {
        Self { client, config }
    }

    /// Get current configuration
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

#[async_trait]
impl ListingSource for HttpListingSource {
    async fn search(&self, query: &SearchQuery, sort: Sort) -> Result<SearchResponse, FetchError> {
        let url = self.config.endpoint.as_str();
        let body = SearchRequest {
            filters: query,
            sort,
            limit: self.config.limit,
        };

        debug!(url = url, sort = %sort, "Sending search request");

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        match response.status() {
            status if status.is_success() => {
                let parsed: SearchResponse = response
                    .json()
                    .await
                    .map_err(|e| FetchError::InvalidData(e.to_string()))?;

                debug!(
                    url = url,
                    total = parsed.total,
                    returned = parsed.listings.len(),
                    "Received search response"
                );
                Ok(parsed)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let wait = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(self.config.rate_limit_wait_secs);

                warn!(url = url, retry_after = wait, "Rate limited by listing source");
                Err(FetchError::RateLimited(wait))
            }
            StatusCode::NOT_FOUND => Err(FetchError::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(url = url, status = ?response.status(), "Unauthorized");
                Err(FetchError::Unauthorized)
            }
            status => {
                warn!(url = url, status = status.as_u16(), "Unexpected status");
                Err(FetchError::ServerError(status.as_u16()))
            }
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::NetworkTimeout
    } else if e.is_connect() {
        FetchError::ConnectionRefused
    } else if e.is_decode() {
        FetchError::InvalidData(e.to_string())
    } else {
        FetchError::Network(e.to_string())
    }
}
