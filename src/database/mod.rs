//! Database layer for listing-watcher
//!
//! This module defines the database trait and SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;

use crate::error::DbError;
use crate::models::SeenListing;

/// Database trait for data persistence
///
/// This trait defines all database operations needed by the application.
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    /// Record a delivered listing
    ///
    /// Returns `true` if the row was inserted, `false` if the id was already
    /// present. Both outcomes leave the id persisted.
    async fn insert_seen(&self, seen: &SeenListing) -> Result<bool, DbError>;

    /// Get the stored record for a listing id
    async fn get_seen(&self, id: &str) -> Result<Option<SeenListing>, DbError>;

    /// Load every recorded listing id
    async fn load_seen_ids(&self) -> Result<Vec<String>, DbError>;

    /// Count recorded listings
    async fn count_seen(&self) -> Result<u64, DbError>;
}
