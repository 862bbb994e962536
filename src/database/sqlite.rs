//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use super::migrations::{migration_version, CREATE_SCHEMA};
use super::Database;
use crate::error::DbError;
use crate::models::SeenListing;

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        // Run migrations
        let version = migration_version();
        conn.call(move |conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            conn.pragma_update(None, "user_version", version)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }

    /// Read the schema version stamped by the last migration
    pub async fn schema_version(&self) -> Result<i32, DbError> {
        self.conn
            .call(|conn| {
                let version = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
                Ok(version)
            })
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn insert_seen(&self, seen: &SeenListing) -> Result<bool, DbError> {
        let id = seen.id.clone();
        let search = seen.search.clone();
        let first_seen_at = seen.first_seen_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                let inserted = conn.execute(
                    r#"
                    INSERT OR IGNORE INTO seen_listings (id, search, first_seen_at)
                    VALUES (?1, ?2, ?3)
                    "#,
                    rusqlite::params![id, search, first_seen_at],
                )?;
                Ok(inserted > 0)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_seen(&self, id: &str) -> Result<Option<SeenListing>, DbError> {
        let id = id.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, search, first_seen_at
                    FROM seen_listings
                    WHERE id = ?1
                    "#,
                )?;

                let result = stmt
                    .query_row([&id], |row| {
                        Ok(SeenListing {
                            id: row.get(0)?,
                            search: row.get(1)?,
                            first_seen_at: parse_datetime(row.get::<_, Option<String>>(2)?)
                                .unwrap_or_else(Utc::now),
                        })
                    })
                    .optional()?;

                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn load_seen_ids(&self) -> Result<Vec<String>, DbError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id FROM seen_listings")?;

                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;

                Ok(ids)
            })
            .await
            .map_err(Into::into)
    }

    async fn count_seen(&self) -> Result<u64, DbError> {
        self.conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM seen_listings", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Into::into)
    }
}

/// Parse a datetime string to DateTime<Utc>
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // Try parsing SQLite's datetime format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}
