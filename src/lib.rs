//! listing-watcher - Poll listing searches and deliver every new listing once
//!
//! Each configured search runs in its own polling loop. New listings are
//! handed to the search's handler with bounded retries and recorded in a
//! persistent dedup store shared by every loop.

pub mod config;
pub mod database;
pub mod dedup;
pub mod error;
pub mod handlers;
pub mod models;
pub mod otel;
pub mod source;
pub mod watch;
