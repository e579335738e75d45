use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, REFERER};
use reqwest::{Client, StatusCode};
use tokio::time::sleep;
use tracing::warn;

use crate::config::Config;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Outcome of a single page fetch. `Gone` covers the allow-listed client
/// errors (403, 404): the page is not coming back, so retrying them as
/// transport faults would only burn the retry budget.
#[derive(Debug)]
pub enum FetchResult {
    Html(String),
    Gone(StatusCode),
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// One attempt against one URL. `Err` means a transport-level failure
    /// (timeout, connection reset, unexpected status) and is retryable.
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchResult>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("pt-PT,pt;q=0.8,en-US;q=0.5,en;q=0.3"),
        );
        headers.insert(REFERER, HeaderValue::from_static("https://www.google.com/"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        // The timeout doubles as the render-wait deadline: a page that has
        // not finished loading within it is handed to the recovery path.
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(cfg.request_timeout)
            .build()
            .context("failed to build http client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchResult> {
        let res = self.client.get(url).send().await?;
        let status = res.status();

        if status.is_success() {
            return Ok(FetchResult::Html(res.text().await?));
        }
        if status == StatusCode::FORBIDDEN || status == StatusCode::NOT_FOUND {
            return Ok(FetchResult::Gone(status));
        }
        anyhow::bail!("unexpected status {status} for {url}")
    }
}

/// Retry wrapper around a single fetch. Transport failures are retried up
/// to `attempts` times with a short pause; an exhausted budget surfaces the
/// last error to the caller, which downgrades it to a page- or
/// listing-skip. `Gone` pages are returned on the first attempt.
pub async fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    url: &str,
    attempts: u32,
) -> anyhow::Result<FetchResult> {
    let mut last_err = None;

    for attempt in 1..=attempts.max(1) {
        match fetcher.fetch(url).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                warn!(url, attempt, error = %e, "fetch attempt failed");
                last_err = Some(e);
                if attempt < attempts {
                    sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no fetch attempts made for {url}")))
}
