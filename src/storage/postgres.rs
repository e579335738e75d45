use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::crawler::models::ListingRecord;
use crate::storage::{CacheEntry, ListingStore};

pub struct Storage {
    pool: PgPool,
}

impl Storage {
    /// Failing to establish the pool at startup is fatal for the run; a
    /// crawl that cannot persist anything should not start fetching.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to postgres")?;

        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                id VARCHAR PRIMARY KEY,
                link TEXT,
                last_crawled TIMESTAMPTZ,
                published_at DATE,

                price DOUBLE PRECISION,
                locality VARCHAR,
                property_subtype VARCHAR,

                gross_area DOUBLE PRECISION,
                usable_area DOUBLE PRECISION,
                lot_area DOUBLE PRECISION,

                build_year INTEGER,
                bedrooms INTEGER,
                bathrooms INTEGER,
                parking VARCHAR,
                elevator VARCHAR,
                energy_certificate VARCHAR,
                description TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ListingStore for Storage {
    async fn load_cache(&self) -> Result<HashMap<String, CacheEntry>> {
        let rows = sqlx::query("SELECT id, price, last_crawled FROM listings")
            .fetch_all(&self.pool)
            .await?;

        let mut cache = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let price: Option<f64> = row.get("price");
            let last_crawled: Option<DateTime<Utc>> = row.get("last_crawled");
            cache.insert(
                id,
                CacheEntry {
                    price: price.unwrap_or(0.0),
                    last_crawled,
                },
            );
        }

        Ok(cache)
    }

    async fn upsert_listing(&self, record: &ListingRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO listings (
                id, link, last_crawled, published_at,
                price, locality, property_subtype,
                gross_area, usable_area, lot_area,
                build_year, bedrooms, bathrooms,
                parking, elevator, energy_certificate,
                description
            )
            VALUES (
                $1, $2, $3, $4,
                $5, $6, $7,
                $8, $9, $10,
                $11, $12, $13,
                $14, $15, $16,
                $17
            )
            ON CONFLICT (id) DO UPDATE SET
                link = EXCLUDED.link,
                last_crawled = EXCLUDED.last_crawled,
                published_at = EXCLUDED.published_at,
                price = EXCLUDED.price,
                locality = EXCLUDED.locality,
                property_subtype = EXCLUDED.property_subtype,
                gross_area = EXCLUDED.gross_area,
                usable_area = EXCLUDED.usable_area,
                lot_area = EXCLUDED.lot_area,
                build_year = EXCLUDED.build_year,
                bedrooms = EXCLUDED.bedrooms,
                bathrooms = EXCLUDED.bathrooms,
                parking = EXCLUDED.parking,
                elevator = EXCLUDED.elevator,
                energy_certificate = EXCLUDED.energy_certificate,
                description = EXCLUDED.description
            "#,
        )
        .bind(&record.id)
        .bind(&record.link)
        .bind(record.last_crawled)
        .bind(record.published_at)
        .bind(record.price)
        .bind(&record.locality)
        .bind(&record.property_subtype)
        .bind(record.gross_area)
        .bind(record.usable_area)
        .bind(record.lot_area)
        .bind(record.build_year)
        .bind(record.bedrooms)
        .bind(record.bathrooms)
        .bind(&record.parking)
        .bind(&record.elevator)
        .bind(&record.energy_certificate)
        .bind(&record.description)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
