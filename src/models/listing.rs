//! Listing-related domain models
//!
//! This module defines listings as returned by a listing source, the query
//! sent to it and the records kept for listings that were already delivered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One listing returned by a listing source
///
/// Only `id` is interpreted by the watcher; every other field is carried
/// through to handlers untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Stable identifier, used as the dedup key
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,

    /// Remaining listing attributes
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Listing {
    /// Create a listing without attributes
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: serde_json::Map::new(),
        }
    }

    /// Add an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

// Sources commonly emit numeric ids; they are keyed as strings either way.
fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "listing id must be a string or number, got {}",
            other
        ))),
    }
}

/// Result ordering requested from a listing source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sort {
    /// Newest listings first
    #[default]
    Newest,
}

impl std::fmt::Display for Sort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sort::Newest => write!(f, "newest"),
        }
    }
}

/// Opaque query parameters of a search
pub type SearchQuery = BTreeMap<String, serde_json::Value>;

/// Response of one search request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Total number of matches reported by the source
    #[serde(default)]
    pub total: u64,

    /// Listings in source order
    #[serde(default)]
    pub listings: Vec<Listing>,
}

impl SearchResponse {
    /// Build a response whose total equals the number of listings
    pub fn from_listings(listings: Vec<Listing>) -> Self {
        Self {
            total: listings.len() as u64,
            listings,
        }
    }
}

/// A delivered listing as persisted in the seen-listings table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenListing {
    /// Listing identifier
    pub id: String,

    /// Name of the search that delivered it, when known
    pub search: Option<String>,

    /// When the listing was first recorded
    pub first_seen_at: DateTime<Utc>,
}

impl SeenListing {
    /// Create a record stamped with the current time
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            search: None,
            first_seen_at: Utc::now(),
        }
    }

    /// Set the delivering search
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }
}
