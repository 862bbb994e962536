//! Deduplication of delivered listings
//!
//! The dedup store is the only state shared between search loops. An id is a
//! member iff the listing it names was delivered successfully, in this run or
//! a previous one.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::DbError;
use crate::models::SeenListing;

/// Membership store for delivered listing ids
///
/// Implementations must be safe to share across search loops: once `add`
/// returns `true`, `contains` returns `true` for that id from every caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Check whether a listing id was already delivered
    async fn contains(&self, id: &str) -> bool;

    /// Mark a listing id as delivered
    ///
    /// Idempotent. Returns `false` if the id could not be recorded, in which
    /// case it must be treated as not delivered.
    async fn add(&self, id: &str) -> bool;

    /// Mark a listing id as delivered by a given search
    async fn add_from(&self, search: &str, id: &str) -> bool {
        let _ = search;
        self.add(id).await
    }
}

/// Write-through dedup store backed by a [`Database`]
///
/// Ids are cached in memory after being persisted, so the cache is always a
/// subset of the table and `contains` never touches the database.
pub struct SeenStore<D: Database> {
    db: Arc<D>,
    ids: RwLock<HashSet<String>>,
}

impl<D: Database> SeenStore<D> {
    /// Create a store primed with every id already persisted
    pub async fn load(db: Arc<D>) -> Result<Self, DbError> {
        let ids: HashSet<String> = db.load_seen_ids().await?.into_iter().collect();
        info!(seen = ids.len(), "Loaded seen listings");

        Ok(Self {
            db,
            ids: RwLock::new(ids),
        })
    }

    /// Number of known ids
    pub async fn len(&self) -> usize {
        self.ids.read().await.len()
    }

    /// Whether no id is known yet
    pub async fn is_empty(&self) -> bool {
        self.ids.read().await.is_empty()
    }

    async fn persist(&self, seen: SeenListing) -> bool {
        if self.ids.read().await.contains(&seen.id) {
            return true;
        }

        match self.db.insert_seen(&seen).await {
            Ok(inserted) => {
                debug!(listing_id = %seen.id, inserted, "Recorded seen listing");
                self.ids.write().await.insert(seen.id);
                true
            }
            Err(err) => {
                warn!(listing_id = %seen.id, error = %err, "Failed to record seen listing");
                false
            }
        }
    }
}

#[async_trait]
impl<D: Database> DedupStore for SeenStore<D> {
    async fn contains(&self, id: &str) -> bool {
        self.ids.read().await.contains(id)
    }

    async fn add(&self, id: &str) -> bool {
        self.persist(SeenListing::new(id)).await
    }

    async fn add_from(&self, search: &str, id: &str) -> bool {
        self.persist(SeenListing::new(id).with_search(search)).await
    }
}
