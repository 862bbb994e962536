//! Database migrations for listing-watcher
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
-- Listings that were delivered successfully
CREATE TABLE IF NOT EXISTS seen_listings (
    id TEXT PRIMARY KEY NOT NULL,
    search TEXT,
    first_seen_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_seen_search ON seen_listings(search);
"#;

/// Get the migration version
pub fn migration_version() -> i32 {
    1
}
