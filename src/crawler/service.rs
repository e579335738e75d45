use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::crawler::fetcher::{fetch_with_retry, FetchResult, PageFetcher};
use crate::crawler::models::{CrawlProgress, ListingSummary};
use crate::crawler::policy::{self, RefetchReason};
use crate::crawler::parser;
use crate::storage::{CacheEntry, ListingStore};

/// End-of-run totals surfaced to the operator. The run's exit status only
/// reflects whether pagination terminated naturally; individual record
/// failures live here.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub pages_visited: u32,
    pub listings_emitted: u64,
    pub saved: u64,
    pub failed: u64,
    pub skipped_pages: u64,
    pub skipped_listings: u64,
}

enum DetailOutcome {
    Saved,
    SaveFailed,
    Skipped,
}

pub struct CrawlService {
    cfg: Config,
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn ListingStore>,
}

impl CrawlService {
    pub fn new(cfg: Config, fetcher: Arc<dyn PageFetcher>, store: Arc<dyn ListingStore>) -> Self {
        Self {
            cfg,
            fetcher,
            store,
        }
    }

    pub async fn run(&self) -> Result<RunSummary> {
        // Seeded once, read-only for the rest of the run. A failed seed
        // read degrades to an empty cache: every listing counts as new,
        // which over-fetches but never silently skips.
        let cache = match self.store.load_cache().await {
            Ok(cache) => {
                info!(listings = cache.len(), "crawl cache seeded from storage");
                cache
            }
            Err(e) => {
                warn!(error = %e, "cache seed failed, crawling with empty cache");
                HashMap::new()
            }
        };

        let mut totals = RunSummary::default();
        let mut progress = CrawlProgress::start();

        for seed in &self.cfg.start_urls {
            self.walk(seed, &cache, &mut totals, &mut progress).await?;
        }

        totals.pages_visited = progress.pages_visited;
        totals.listings_emitted = progress.listings_emitted;

        info!(
            pages = totals.pages_visited,
            saved = totals.saved,
            failed = totals.failed,
            skipped_pages = totals.skipped_pages,
            skipped_listings = totals.skipped_listings,
            "crawl finished"
        );

        Ok(totals)
    }

    /// Sequential walk of one seed's index pages. A page lost after the
    /// retry budget is logged and skipped, never fatal — except the very
    /// first page of the walk, where failure means the site itself is
    /// unreachable.
    async fn walk(
        &self,
        seed: &str,
        cache: &HashMap<String, CacheEntry>,
        totals: &mut RunSummary,
        progress: &mut CrawlProgress,
    ) -> Result<()> {
        let mut page = parser::page_number(seed);
        let mut url = seed.to_string();
        let mut reached_site = false;

        loop {
            match fetch_with_retry(self.fetcher.as_ref(), &url, self.cfg.retry_times).await {
                Ok(FetchResult::Html(html)) => {
                    reached_site = true;
                    progress.record_page();

                    let summaries = parser::parse_summaries(&html);
                    info!(
                        page,
                        items = summaries.len(),
                        eta_min = progress.eta_minutes(self.cfg.total_pages_hint),
                        "index page parsed"
                    );

                    let due = self.due_listings(summaries, cache);
                    self.fetch_details(due, page, totals, progress).await;

                    if !parser::has_next_page(&html) {
                        info!(page, "last page reached");
                        break;
                    }
                }
                Ok(FetchResult::Gone(status)) => {
                    warn!(page, %status, "index page gone, ending walk");
                    break;
                }
                Err(e) if !reached_site => {
                    return Err(e)
                        .with_context(|| format!("cannot reach first index page {url}"));
                }
                Err(e) => {
                    totals.skipped_pages += 1;
                    warn!(page, error = %e, "index page lost after retries, advancing");
                }
            }

            page += 1;
            url = parser::with_page(&url, page)?;
            sleep(self.cfg.download_delay).await;
        }

        Ok(())
    }

    fn due_listings(
        &self,
        summaries: Vec<ListingSummary>,
        cache: &HashMap<String, CacheEntry>,
    ) -> Vec<(ListingSummary, RefetchReason)> {
        let now = Utc::now();
        let ttl = ChronoDuration::days(self.cfg.ttl_days);

        summaries
            .into_iter()
            .filter_map(|summary| {
                match policy::should_refetch(&summary.id, summary.price, cache, now, ttl) {
                    Some(reason) => {
                        debug!(id = %summary.id, ?reason, "detail refetch due");
                        Some((summary, reason))
                    }
                    None => {
                        debug!(id = %summary.id, "unchanged and fresh, skipping");
                        None
                    }
                }
            })
            .collect()
    }

    /// Bounded fan-out of detail fetches for one index page. Each task
    /// takes a semaphore permit and pauses for the inter-request delay
    /// before dispatching; a failed listing is isolated to itself.
    async fn fetch_details(
        &self,
        due: Vec<(ListingSummary, RefetchReason)>,
        page: u32,
        totals: &mut RunSummary,
        progress: &mut CrawlProgress,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.cfg.concurrent_requests));
        let mut tasks: JoinSet<(String, DetailOutcome)> = JoinSet::new();

        for (summary, reason) in due {
            let fetcher = Arc::clone(&self.fetcher);
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let delay = self.cfg.download_delay;
            let retries = self.cfg.retry_times;

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("detail semaphore closed");
                sleep(delay).await;

                debug!(id = %summary.id, ?reason, stable_id = summary.stable_id, "fetching detail page");
                let outcome =
                    match fetch_with_retry(fetcher.as_ref(), &summary.link, retries).await {
                        Ok(FetchResult::Html(html)) => {
                            let record = parser::parse_detail(&html, &summary, Utc::now());
                            match store.upsert_listing(&record).await {
                                Ok(()) => DetailOutcome::Saved,
                                Err(e) => {
                                    error!(id = %summary.id, error = %e, "failed to save listing");
                                    DetailOutcome::SaveFailed
                                }
                            }
                        }
                        Ok(FetchResult::Gone(status)) => {
                            warn!(id = %summary.id, %status, "detail page gone, skipping");
                            DetailOutcome::Skipped
                        }
                        Err(e) => {
                            warn!(id = %summary.id, error = %e, "detail fetch lost after retries, skipping");
                            DetailOutcome::Skipped
                        }
                    };

                (summary.id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, DetailOutcome::Saved)) => {
                    totals.saved += 1;
                    progress.record_listing();
                    info!(id = %id, page, total_saved = totals.saved, "listing saved");
                }
                Ok((id, DetailOutcome::SaveFailed)) => {
                    totals.failed += 1;
                    progress.record_listing();
                    warn!(id = %id, page, total_failed = totals.failed, "listing not saved");
                }
                Ok((_, DetailOutcome::Skipped)) => {
                    totals.skipped_listings += 1;
                }
                Err(e) => {
                    totals.skipped_listings += 1;
                    error!(error = %e, "detail task aborted");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::storage::memory::MemoryStore;

    enum Plan {
        Html(String),
        Gone,
        Fail,
    }

    struct MockFetcher {
        plans: HashMap<String, Plan>,
        calls: Mutex<Vec<String>>,
    }

    impl MockFetcher {
        fn new(plans: HashMap<String, Plan>) -> Self {
            Self {
                plans,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls_to(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
        }

        fn distinct_calls(&self) -> usize {
            let calls = self.calls.lock().unwrap();
            let mut seen: Vec<&String> = Vec::new();
            for c in calls.iter() {
                if !seen.contains(&c) {
                    seen.push(c);
                }
            }
            seen.len()
        }
    }

    #[async_trait]
    impl PageFetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchResult> {
            self.calls.lock().unwrap().push(url.to_string());
            match self.plans.get(url) {
                Some(Plan::Html(html)) => Ok(FetchResult::Html(html.clone())),
                Some(Plan::Gone) => Ok(FetchResult::Gone(reqwest::StatusCode::NOT_FOUND)),
                Some(Plan::Fail) => anyhow::bail!("navigation timeout"),
                None => anyhow::bail!("no plan for {url}"),
            }
        }
    }

    const SEED: &str = "https://site.test/comprar?p=1";

    fn test_config() -> Config {
        Config {
            start_urls: vec![SEED.to_string()],
            database_url: String::new(),
            ttl_days: 7,
            concurrent_requests: 3,
            download_delay: Duration::from_millis(0),
            retry_times: 2,
            request_timeout: Duration::from_secs(5),
            total_pages_hint: 10,
        }
    }

    fn card(id: &str) -> String {
        format!(
            r#"<a data-id="listing-card-link" href="/imoveis/venda-apartamento-t1-lisboa/{id}">
                <span>100.000 €</span><b>50 m²</b>
                <p class="text-ellipsis">Lisboa, Lisboa</p>
            </a>"#
        )
    }

    fn index_page(cards: &[String], next_enabled: bool) -> String {
        let next_class = if next_enabled {
            "MuiButtonBase-root"
        } else {
            "MuiButtonBase-root Mui-disabled"
        };
        format!(
            r#"<html><body><div class="grid">{}</div>
            <button aria-label="Go to next page" class="{next_class}">&gt;</button>
            </body></html>"#,
            cards.join("\n")
        )
    }

    fn detail_link(id: &str) -> String {
        format!("https://remax.pt/imoveis/venda-apartamento-t1-lisboa/{id}")
    }

    fn detail_page() -> String {
        "<html><body><div><span>Quartos</span><span>2</span></div></body></html>".to_string()
    }

    fn page_url(page: u32) -> String {
        parser::with_page(SEED, page).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn walker_stops_when_next_control_is_disabled() {
        let mut plans = HashMap::new();
        plans.insert(SEED.to_string(), Plan::Html(index_page(&[], true)));
        for page in 2..=4 {
            plans.insert(page_url(page), Plan::Html(index_page(&[], true)));
        }
        plans.insert(page_url(5), Plan::Html(index_page(&[], false)));

        let fetcher = Arc::new(MockFetcher::new(plans));
        let store = Arc::new(MemoryStore::new());
        let service = CrawlService::new(test_config(), fetcher.clone(), store);

        let summary = service.run().await.unwrap();

        assert_eq!(summary.pages_visited, 5);
        assert_eq!(fetcher.distinct_calls(), 5);
        assert_eq!(summary.skipped_pages, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_index_page_is_skipped_and_walk_advances() {
        let mut plans = HashMap::new();
        plans.insert(SEED.to_string(), Plan::Html(index_page(&[], true)));
        plans.insert(page_url(2), Plan::Fail);
        plans.insert(page_url(3), Plan::Html(index_page(&[], false)));

        let fetcher = Arc::new(MockFetcher::new(plans));
        let store = Arc::new(MemoryStore::new());
        let service = CrawlService::new(test_config(), fetcher.clone(), store);

        let summary = service.run().await.unwrap();

        assert_eq!(summary.pages_visited, 2);
        assert_eq!(summary.skipped_pages, 1);
        // Lost page consumed the whole retry budget before the skip.
        assert_eq!(fetcher.calls_to(&page_url(2)), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_first_page_is_fatal() {
        let mut plans = HashMap::new();
        plans.insert(SEED.to_string(), Plan::Fail);

        let fetcher = Arc::new(MockFetcher::new(plans));
        let store = Arc::new(MemoryStore::new());
        let service = CrawlService::new(test_config(), fetcher, store);

        assert!(service.run().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn gone_index_page_ends_walk_without_error() {
        let mut plans = HashMap::new();
        plans.insert(SEED.to_string(), Plan::Html(index_page(&[], true)));
        plans.insert(page_url(2), Plan::Gone);

        let fetcher = Arc::new(MockFetcher::new(plans));
        let store = Arc::new(MemoryStore::new());
        let service = CrawlService::new(test_config(), fetcher, store);

        let summary = service.run().await.unwrap();
        assert_eq!(summary.pages_visited, 1);
        assert_eq!(summary.skipped_pages, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_detail_is_isolated_from_the_rest_of_the_page() {
        let mut plans = HashMap::new();
        plans.insert(
            SEED.to_string(),
            Plan::Html(index_page(&[card("111-1"), card("222-2")], false)),
        );
        plans.insert(detail_link("111-1"), Plan::Html(detail_page()));
        plans.insert(detail_link("222-2"), Plan::Fail);

        let fetcher = Arc::new(MockFetcher::new(plans));
        let store = Arc::new(MemoryStore::new());
        let service = CrawlService::new(test_config(), fetcher, store.clone());

        let summary = service.run().await.unwrap();

        assert_eq!(summary.saved, 1);
        assert_eq!(summary.skipped_listings, 1);
        assert!(store.get("111-1").is_some());
        assert!(store.get("222-2").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_unchanged_listings_skip_the_detail_fetch() {
        let mut plans = HashMap::new();
        plans.insert(
            SEED.to_string(),
            Plan::Html(index_page(&[card("111-1")], false)),
        );
        // No plan for the detail link: reaching it would fail the test
        // through the skip counter below.

        let store = Arc::new(MemoryStore::new());
        store.seed_cache(
            "111-1",
            CacheEntry {
                price: 100_000.0,
                last_crawled: Some(Utc::now()),
            },
        );

        let fetcher = Arc::new(MockFetcher::new(plans));
        let service = CrawlService::new(test_config(), fetcher.clone(), store.clone());

        let summary = service.run().await.unwrap();

        assert_eq!(summary.saved, 0);
        assert_eq!(summary.skipped_listings, 0);
        assert_eq!(fetcher.calls_to(&detail_link("111-1")), 0);
        assert!(store.get("111-1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_listing_is_refetched() {
        let mut plans = HashMap::new();
        plans.insert(
            SEED.to_string(),
            Plan::Html(index_page(&[card("111-1")], false)),
        );
        plans.insert(detail_link("111-1"), Plan::Html(detail_page()));

        let store = Arc::new(MemoryStore::new());
        store.seed_cache(
            "111-1",
            CacheEntry {
                price: 100_000.0,
                last_crawled: Some(Utc::now() - ChronoDuration::days(8)),
            },
        );

        let fetcher = Arc::new(MockFetcher::new(plans));
        let service = CrawlService::new(test_config(), fetcher, store.clone());

        let summary = service.run().await.unwrap();

        assert_eq!(summary.saved, 1);
        assert!(store.get("111-1").is_some());
    }
}
