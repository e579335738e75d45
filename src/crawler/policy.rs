use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::storage::CacheEntry;

/// Why a listing's detail page is worth fetching again. The three reasons
/// have different triggers and very different expected frequencies, so
/// they stay distinguishable all the way into the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchReason {
    /// Never seen before.
    New,
    /// Price on the index card differs from the stored one; always worth
    /// re-scraping regardless of age.
    PriceChanged,
    /// Unchanged price but past the TTL; descriptions and areas drift
    /// without a visible price change.
    Stale,
}

/// Three-state refetch decision collapsing to skip (`None`) or fetch with
/// a reason. The cache is the read-only snapshot seeded at startup.
pub fn should_refetch(
    id: &str,
    observed_price: f64,
    cache: &HashMap<String, CacheEntry>,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Option<RefetchReason> {
    let Some(entry) = cache.get(id) else {
        return Some(RefetchReason::New);
    };

    if entry.price != observed_price {
        return Some(RefetchReason::PriceChanged);
    }

    // A missing timestamp means the cached row cannot be trusted; fail
    // open toward refetching instead of silently skipping.
    let Some(last_crawled) = entry.last_crawled else {
        return Some(RefetchReason::Stale);
    };

    if now.signed_duration_since(last_crawled) >= ttl {
        return Some(RefetchReason::Stale);
    }

    None
}
