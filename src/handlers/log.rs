//! Handler that writes new listings to the log

use async_trait::async_trait;
use tracing::info;

use super::Handler;
use crate::error::HandlerError;
use crate::models::Listing;

/// Logs each new listing at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    fn kind(&self) -> &'static str {
        "log"
    }

    async fn handle(&self, listing: &Listing, search: &str) -> Result<(), HandlerError> {
        let attributes = serde_json::Value::Object(listing.attributes.clone());
        info!(
            search = search,
            listing_id = %listing.id,
            attributes = %attributes,
            "New listing"
        );
        Ok(())
    }
}
