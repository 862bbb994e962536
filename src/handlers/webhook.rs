//! Handler that POSTs new listings to a webhook

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::Handler;
use crate::error::HandlerError;
use crate::models::Listing;

/// Body sent to the webhook
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    search: &'a str,
    listing: &'a Listing,
}

/// Delivers each new listing as a JSON POST
///
/// Any 2xx response counts as delivered. Other statuses map to
/// [`HandlerError::Rejected`], transport failures to [`HandlerError::Transport`].
#[derive(Debug, Clone)]
pub struct WebhookHandler {
    client: Client,
    url: String,
}

impl WebhookHandler {
    /// Create a webhook handler with static headers and a request timeout
    pub fn new(
        url: impl Into<String>,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, HandlerError> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| HandlerError::Failed(format!("Invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| HandlerError::Failed(format!("Invalid header value: {e}")))?;
            header_map.insert(name, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(header_map)
            .build()
            .map_err(|e| HandlerError::Failed(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Handler for WebhookHandler {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    async fn handle(&self, listing: &Listing, search: &str) -> Result<(), HandlerError> {
        let payload = WebhookPayload { search, listing };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| HandlerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandlerError::Rejected(status.as_u16()));
        }

        debug!(
            search = search,
            listing_id = %listing.id,
            status = status.as_u16(),
            "Webhook accepted listing"
        );
        Ok(())
    }
}
