//! In-memory [`ListingStore`] used by the crawl-loop tests, mirroring the
//! upsert and cache-seed contract of the Postgres gateway.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::crawler::models::ListingRecord;
use crate::storage::{CacheEntry, ListingStore};

#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<String, ListingRecord>>,
    /// Rows reported by `load_cache` on top of what has been upserted;
    /// lets tests seed "previous run" state without going through upsert.
    seed: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_cache(&self, id: &str, entry: CacheEntry) {
        self.seed.write().unwrap().insert(id.to_string(), entry);
    }

    pub fn get(&self, id: &str) -> Option<ListingRecord> {
        self.rows.read().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().unwrap().is_empty()
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn load_cache(&self) -> Result<HashMap<String, CacheEntry>> {
        let mut cache = self.seed.read().unwrap().clone();
        for (id, record) in self.rows.read().unwrap().iter() {
            cache.insert(
                id.clone(),
                CacheEntry {
                    price: record.price,
                    last_crawled: Some(record.last_crawled),
                },
            );
        }
        Ok(cache)
    }

    async fn upsert_listing(&self, record: &ListingRecord) -> Result<()> {
        self.rows
            .write()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record(id: &str, price: f64) -> ListingRecord {
        let now = Utc::now();
        ListingRecord {
            id: id.into(),
            link: format!("https://remax.pt/imoveis/venda-apartamento-lisboa/{id}"),
            last_crawled: now,
            published_at: now.date_naive(),
            price,
            locality: "Lisboa".into(),
            property_subtype: "Apartamento".into(),
            gross_area: Some(80.0),
            usable_area: None,
            lot_area: None,
            build_year: Some(1990),
            bedrooms: Some(2),
            bathrooms: Some(1),
            parking: None,
            elevator: Some("Sim".into()),
            energy_certificate: Some("C".into()),
            description: Some("Bom estado.".into()),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = MemoryStore::new();
        let rec = record("111-1", 200_000.0);

        store.upsert_listing(&rec).await.unwrap();
        store.upsert_listing(&rec).await.unwrap();

        assert_eq!(store.len(), 1);
        let stored = store.get("111-1").unwrap();
        assert_eq!(stored.price, rec.price);
        assert_eq!(stored.description, rec.description);
    }

    #[tokio::test]
    async fn upsert_replaces_mutable_fields_and_keeps_id() {
        let store = MemoryStore::new();
        store.upsert_listing(&record("111-1", 200_000.0)).await.unwrap();

        let mut updated = record("111-1", 180_000.0);
        updated.description = Some("Preço revisto.".into());
        store.upsert_listing(&updated).await.unwrap();

        assert_eq!(store.len(), 1);
        let stored = store.get("111-1").unwrap();
        assert_eq!(stored.price, 180_000.0);
        assert_eq!(stored.description.as_deref(), Some("Preço revisto."));
    }

    #[tokio::test]
    async fn cache_reflects_upserted_rows() {
        let store = MemoryStore::new();
        store.upsert_listing(&record("111-1", 200_000.0)).await.unwrap();

        let cache = store.load_cache().await.unwrap();
        assert_eq!(cache["111-1"].price, 200_000.0);
        assert!(cache["111-1"].last_crawled.is_some());
    }
}
