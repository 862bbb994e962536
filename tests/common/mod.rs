//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use listing_watcher::config::{RetryConfig, SourceConfig};
use listing_watcher::database::SqliteDatabase;
use listing_watcher::dedup::SeenStore;
use listing_watcher::error::HandlerError;
use listing_watcher::handlers::{FnHandler, Handler};
use listing_watcher::models::Listing;
use listing_watcher::watch::RetryExecutor;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::new(":memory:")
            .await
            .expect("Failed to create test database"),
    )
}

/// Create a dedup store over a fresh in-memory database
pub async fn create_test_store() -> Arc<SeenStore<SqliteDatabase>> {
    let db = create_test_database().await;
    Arc::new(
        SeenStore::load(db)
            .await
            .expect("Failed to load seen store"),
    )
}

/// Retry executor without backoff waits
pub fn create_test_retry(max_attempts: u32) -> RetryExecutor {
    RetryExecutor::new(RetryConfig {
        max_attempts,
        initial_backoff_ms: 0,
    })
}

/// Source configuration pointing at a mock server
pub fn create_test_source_config(server: &MockServer) -> SourceConfig {
    SourceConfig {
        endpoint: format!("{}/search", server.uri()),
        timeout_secs: 5,
        ..Default::default()
    }
}

/// Start a mock listing source always answering with the given ids
pub async fn start_listing_server(ids: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    let listings: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| serde_json::json!({"id": id, "title": format!("Listing {id}")}))
        .collect();

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total": listings.len(),
            "listings": listings,
        })))
        .mount(&server)
        .await;

    server
}

/// Handler failing its first `failures` calls and recording every call
pub struct ScriptedHandler {
    pub failures: u32,
    pub calls: Arc<AtomicU32>,
    pub received: Arc<Mutex<Vec<(String, String)>>>,
}

impl ScriptedHandler {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: Arc::new(AtomicU32::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn into_handler(self) -> Arc<dyn Handler> {
        let failures = self.failures;
        let calls = self.calls;
        let received = self.received;
        Arc::new(FnHandler::new(move |listing: &Listing, search: &str| {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            received
                .lock()
                .unwrap()
                .push((search.to_string(), listing.id.clone()));
            if call <= failures {
                Err(HandlerError::failed(format!("scripted failure {call}")))
            } else {
                Ok(())
            }
        }))
    }
}

/// Headers map helper
pub fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Poll interval used by loop tests
pub const TEST_INTERVAL: Duration = Duration::from_secs(3600);
