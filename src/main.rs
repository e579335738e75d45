mod config;
mod crawler;
mod storage;

use std::sync::Arc;

use config::Config;
use crawler::fetcher::HttpFetcher;
use crawler::service::CrawlService;
use storage::postgres::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = Config::from_env()?;

    let storage = Storage::connect(&cfg.database_url).await?;
    storage.init_schema().await?;

    let fetcher = HttpFetcher::new(&cfg)?;
    let service = CrawlService::new(cfg, Arc::new(fetcher), Arc::new(storage));

    let summary = service.run().await?;

    println!("\n==============================");
    println!("PAGES VISITED:    {}", summary.pages_visited);
    println!("LISTINGS PARSED:  {}", summary.listings_emitted);
    println!("LISTINGS SAVED:   {}", summary.saved);
    println!("SAVE FAILURES:    {}", summary.failed);
    println!("PAGES SKIPPED:    {}", summary.skipped_pages);
    println!("LISTINGS SKIPPED: {}", summary.skipped_listings);
    println!("==============================\n");

    Ok(())
}
