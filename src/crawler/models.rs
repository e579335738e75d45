use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};

/// Per-card summary parsed from an index page. Consumed by the staleness
/// policy right away; only candidates that survive carry their summary
/// into the detail fetch.
#[derive(Debug, Clone)]
pub struct ListingSummary {
    pub id: String,
    pub link: String,
    pub price: f64,
    pub area: i64,
    pub locality: String,
    /// False when the id fell back to the full address because the
    /// trailing `digits-digits` segment was missing. Such ids break
    /// upsert stability if the address ever changes upstream.
    pub stable_id: bool,
}

/// The durable entity, one row per listing keyed by `id`. An upsert on an
/// existing id replaces every field below except the id itself.
#[derive(Debug, Clone)]
pub struct ListingRecord {
    pub id: String,
    pub link: String,
    pub last_crawled: DateTime<Utc>,
    pub published_at: NaiveDate,
    pub price: f64,
    pub locality: String,
    pub property_subtype: String,
    pub gross_area: Option<f64>,
    pub usable_area: Option<f64>,
    pub lot_area: Option<f64>,
    pub build_year: Option<i32>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub parking: Option<String>,
    pub elevator: Option<String>,
    pub energy_certificate: Option<String>,
    pub description: Option<String>,
}

/// Ephemeral run counters for operator-facing progress logs. Never
/// persisted; rebuilt from zero on every run.
pub struct CrawlProgress {
    started: Instant,
    pub pages_visited: u32,
    pub listings_emitted: u64,
}

impl CrawlProgress {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            pages_visited: 0,
            listings_emitted: 0,
        }
    }

    pub fn record_page(&mut self) {
        self.pages_visited += 1;
    }

    pub fn record_listing(&mut self) {
        self.listings_emitted += 1;
    }

    /// Rough minutes-to-finish estimate from the average page time so far
    /// and a configured hint of how many pages the full walk usually has.
    pub fn eta_minutes(&self, total_pages_hint: u32) -> u64 {
        if self.pages_visited == 0 {
            return 0;
        }
        let avg = self.started.elapsed().as_secs_f64() / f64::from(self.pages_visited);
        let left = total_pages_hint.saturating_sub(self.pages_visited);
        (avg * f64::from(left)) as u64 / 60
    }
}

#[cfg(test)]
mod tests {
    use super::CrawlProgress;

    #[test]
    fn eta_is_zero_before_first_page_and_past_the_hint() {
        let mut progress = CrawlProgress::start();
        assert_eq!(progress.eta_minutes(450), 0);

        for _ in 0..10 {
            progress.record_page();
        }
        // Hint already exceeded: nothing left to estimate.
        assert_eq!(progress.eta_minutes(5), 0);
    }
}
