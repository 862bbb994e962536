//! Application error types for listing-watcher
//!
//! This module defines the source, handler and storage error types.
//! Configuration and telemetry errors live next to their modules.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Errors returned by a listing source while fetching search results
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    /// Network timeout
    #[error("Network timeout")]
    NetworkTimeout,

    /// Connection refused
    #[error("Connection refused")]
    ConnectionRefused,

    /// Rate limited by upstream
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Server error
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Invalid data received
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Resource not found
    #[error("Resource not found")]
    NotFound,

    /// Unauthorized
    #[error("Unauthorized")]
    Unauthorized,

    /// Client could not be built (bad proxy URL, TLS backend failure, ...)
    #[error("Client setup failed: {0}")]
    Client(String),

    /// Generic network error
    #[error("Network error: {0}")]
    Network(String),
}

/// Errors raised by listing handlers
///
/// Every variant is retried the same way.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HandlerError {
    /// Delivery endpoint rejected the listing
    #[error("Delivery rejected: HTTP {0}")]
    Rejected(u16),

    /// Transport-level failure while delivering
    #[error("Delivery transport error: {0}")]
    Transport(String),

    /// Any other handler failure
    #[error("Handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    /// Convenience constructor for ad-hoc handler failures
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Error from the async connection wrapper
    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),
}
