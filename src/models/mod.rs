//! Domain models for listing-watcher
//!
//! This module contains the core domain models used throughout the application.

pub mod listing;
pub mod search;

// Re-export commonly used types
pub use listing::{Listing, SearchQuery, SearchResponse, SeenListing, Sort};
pub use search::SearchDefinition;
