//! Listing watch engine
//!
//! # Components
//!
//! - [`retry`]: Retry executor delivering one listing with exponential backoff
//! - [`search_loop`]: Poll-filter-deliver loop for one search
//! - [`scheduler`]: Staggered launch and shutdown of every search loop
//!
//! # Example
//!
//! ```ignore
//! use listing_watcher::watch::{RetryExecutor, WatchScheduler};
//! use listing_watcher::config::{RetryConfig, SchedulerConfig};
//!
//! let mut scheduler = WatchScheduler::new(
//!     SchedulerConfig::default(),
//!     RetryExecutor::new(RetryConfig::default()),
//!     dedup,
//!     sources,
//! );
//!
//! if scheduler.start(searches).await {
//!     shutdown_signal().await;
//!     scheduler.shutdown().await;
//! }
//! ```

pub mod retry;
pub mod scheduler;
pub mod search_loop;

pub use retry::{DeliveryOutcome, RetryExecutor};
pub use scheduler::WatchScheduler;
pub use search_loop::{remaining_delay, IterationReport, SearchLoop, SearchStatus, StatusMap};
