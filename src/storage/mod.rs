use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::crawler::models::ListingRecord;

#[cfg(test)]
pub mod memory;
pub mod postgres;

/// What the staleness policy needs to know about a previously stored
/// listing: last seen price and when the detail page was last crawled.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub price: f64,
    pub last_crawled: Option<DateTime<Utc>>,
}

/// The single owner of the durable-store contract. Everything else reads
/// or computes; only implementations of this trait mutate storage.
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Full scan of id/price/last_crawled, issued once at startup to seed
    /// the in-process crawl cache.
    async fn load_cache(&self) -> Result<HashMap<String, CacheEntry>>;

    /// Insert-or-update keyed on `id`, replacing every mutable field.
    /// Must be transactional per record: a failure affects this record
    /// only and must leave no partial row behind.
    async fn upsert_listing(&self, record: &ListingRecord) -> Result<()>;
}
