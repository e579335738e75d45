use std::env;
use std::time::Duration;

use anyhow::Context;

/// Crawl-etiquette values (TTL, concurrency, delay, retries) are policy,
/// not constants; they all come from the environment with the defaults
/// the target site has tolerated so far.
pub struct Config {
    pub start_urls: Vec<String>,
    pub database_url: String,
    pub ttl_days: i64,
    pub concurrent_requests: usize,
    pub download_delay: Duration,
    pub retry_times: u32,
    pub request_timeout: Duration,
    pub total_pages_hint: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let start_urls = parse_start_urls(
            &env::var("START_URLS_LIST").context("START_URLS_LIST is not set")?,
        )?;

        let host = env::var("PGHOST").context("PGHOST is not set")?;
        let port = env::var("PGPORT").context("PGPORT is not set")?;
        let user = env::var("PGUSER").context("PGUSER is not set")?;
        let password = env::var("PGPASSWORD").context("PGPASSWORD is not set")?;
        let dbname = env::var("PGDATABASE").context("PGDATABASE is not set")?;

        Ok(Self {
            start_urls,
            database_url: format!("postgres://{user}:{password}@{host}:{port}/{dbname}"),
            ttl_days: env_or("TTL_DAYS", 7)?,
            concurrent_requests: env_or("CONCURRENT_REQUESTS", 3)?,
            download_delay: Duration::from_millis(env_or("DOWNLOAD_DELAY_MS", 2500)?),
            retry_times: env_or("RETRY_TIMES", 3)?,
            request_timeout: Duration::from_secs(env_or("REQUEST_TIMEOUT_SECS", 60)?),
            total_pages_hint: env_or("TOTAL_PAGES_HINT", 450)?,
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

/// The seed list arrives as a JSON array so multi-URL deployments fit in
/// a single env var.
fn parse_start_urls(raw: &str) -> anyhow::Result<Vec<String>> {
    let urls: Vec<String> =
        serde_json::from_str(raw).context("START_URLS_LIST is not a JSON array of URLs")?;
    if urls.is_empty() {
        anyhow::bail!("START_URLS_LIST is empty");
    }
    Ok(urls)
}
