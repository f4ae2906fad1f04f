/// file: src/scraper.rs
/// description: HTTP/browser fetching and the multi-source search aggregation pipeline.
/// Scraper — shared HTTP client, lazy headless-browser pool, and the
/// fan-out/merge pipeline that turns one query into a unified product list.
use crate::config::{ProxyConfig, ScraperConfig};
use crate::models::{AppError, Product};
use crate::sources::{FetchKind, SourceId};
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use futures::future::join_all;
use rand::seq::SliceRandom;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Browser pool
// ---------------------------------------------------------------------------

/// Lazily-launched shared Chromium instance for client-rendered sources.
/// Nothing starts until the first browser-backed source is actually queried.
#[derive(Clone)]
pub struct BrowserPool {
    inner: Arc<Mutex<Option<Arc<Browser>>>>,
    config: Arc<ScraperConfig>,
}

impl BrowserPool {
    pub fn new(config: ScraperConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            config: Arc::new(config),
        }
    }

    async fn get_or_launch(&self) -> Result<Arc<Browser>, AppError> {
        let mut guard = self.inner.lock().await;
        if let Some(ref b) = *guard {
            return Ok(Arc::clone(b));
        }

        let builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", self.config.user_agent));

        let browser_cfg = builder
            .build()
            .map_err(|e| AppError::Scraper(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_cfg)
            .await
            .map_err(|e| AppError::Scraper(format!("Browser launch failed: {e}")))?;

        tokio::spawn(async move { while handler.next().await.is_some() {} });

        let shared = Arc::new(browser);
        *guard = Some(Arc::clone(&shared));
        Ok(shared)
    }

    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(browser) = guard.take()
            && let Ok(mut b) = Arc::try_unwrap(browser)
            && let Err(e) = b.close().await
        {
            warn!(error = %e, "Browser close error");
        }
    }

    /// Navigate, wait for the page to settle, and return the rendered HTML.
    pub async fn fetch_page(
        &self,
        url: &str,
        wait_for_ms: u64,
        timeout: Duration,
    ) -> Result<String, AppError> {
        let browser = self.get_or_launch().await?;

        let page = tokio::time::timeout(timeout, browser.new_page(url))
            .await
            .map_err(|_| AppError::Timeout)?
            .map_err(|e| AppError::Scraper(format!("Failed to open page: {e}")))?;

        // Wait for navigation (best-effort).
        let _ = tokio::time::timeout(Duration::from_secs(10), page.wait_for_navigation()).await;

        // Client-rendered listings keep loading after navigation settles.
        if wait_for_ms > 0 {
            tokio::time::sleep(Duration::from_millis(wait_for_ms)).await;
        }

        let html = tokio::time::timeout(timeout, page.content())
            .await
            .map_err(|_| AppError::Timeout)?
            .map_err(|e| AppError::Scraper(format!("Failed to get content: {e}")))?;

        if let Err(e) = page.close().await {
            debug!(url, error = %e, "Page close error (tab leak)");
        }

        Ok(html)
    }
}

// ---------------------------------------------------------------------------
// HTTP fetcher
// ---------------------------------------------------------------------------

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &ScraperConfig, proxy: &ProxyConfig) -> Result<Self, AppError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.request_timeout_seconds));

        if let Some(server) = &proxy.server {
            let mut px = reqwest::Proxy::all(server)
                .map_err(|e| AppError::Scraper(format!("Proxy config error: {e}")))?;
            if let Some(username) = &proxy.username {
                px = px.basic_auth(username, proxy.password.as_deref().unwrap_or(""));
            }
            builder = builder.proxy(px);
        }

        let client = builder
            .build()
            .map_err(|e| AppError::Scraper(format!("HTTP client build failed: {e}")))?;

        Ok(Self { client })
    }

    /// Returns `(status_code, body)`.
    pub async fn fetch(&self, url: &str) -> Result<(u16, String), AppError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Scraper(format!("HTTP request failed: {e}")))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| AppError::Scraper(format!("Failed to read body: {e}")))?;

        Ok((status, body))
    }
}

// ---------------------------------------------------------------------------
// Top-level Scraper (combines HTTP + browser + source registry)
// ---------------------------------------------------------------------------

pub struct Scraper {
    pub http: HttpFetcher,
    pub browser: BrowserPool,
    sources: Vec<SourceId>,
    config: Arc<ScraperConfig>,
}

impl Scraper {
    pub fn new(cfg: &ScraperConfig, proxy: &ProxyConfig) -> Result<Self, AppError> {
        let mut sources = Vec::with_capacity(cfg.sources.len());
        for name in &cfg.sources {
            let id = SourceId::from_name(name).ok_or_else(|| {
                let known: Vec<&str> = SourceId::ALL.iter().map(|s| s.name()).collect();
                AppError::Scraper(format!(
                    "Unknown scraper source `{name}` in SCRAPER_SOURCES (known: {})",
                    known.join(", ")
                ))
            })?;
            if !sources.contains(&id) {
                sources.push(id);
            }
        }

        debug!(
            sources = ?cfg.sources,
            max_results = cfg.max_results,
            "Scraper runtime settings"
        );

        Ok(Self {
            http: HttpFetcher::new(cfg, proxy)?,
            browser: BrowserPool::new(cfg.clone()),
            sources,
            config: Arc::new(cfg.clone()),
        })
    }

    pub fn enabled_sources(&self) -> &[SourceId] {
        &self.sources
    }

    pub async fn shutdown(&self) {
        self.browser.shutdown().await;
    }

    /// Fetch and parse one source's results page.
    async fn scrape_source(&self, source: SourceId, query: &str) -> Result<Vec<Product>, AppError> {
        let url = source.search_url(query);

        let html = match source.kind() {
            FetchKind::Http => {
                let (status, body) = self.http.fetch(&url).await?;
                if !(200..300).contains(&status) {
                    // The site answered; it just doesn't want to talk to us.
                    // Same outcome as an empty results page.
                    warn!(source = source.name(), status, "non-success status from source");
                    return Ok(Vec::new());
                }
                body
            }
            FetchKind::Browser => {
                let timeout = Duration::from_secs(self.config.request_timeout_seconds);
                self.browser
                    .fetch_page(&url, self.config.browser_page_wait_ms, timeout)
                    .await?
            }
        };

        let products = source.parse_listing(&html);
        debug!(
            source = source.name(),
            count = products.len(),
            "source scraped"
        );
        Ok(products)
    }

    /// The aggregation pipeline: fan out to every enabled source
    /// concurrently, tolerate per-source failures, merge, shuffle, truncate.
    /// Always returns a list (possibly empty) — a search never fails because
    /// a site is down or redesigned its markup.
    pub async fn search(&self, query: &str) -> Vec<Product> {
        let tasks = self.sources.iter().map(|&source| async move {
            (source, self.scrape_source(source, query).await)
        });

        let outcomes = join_all(tasks).await;
        let mut products = merge_outcomes(outcomes);

        products.shuffle(&mut rand::rng());
        products.truncate(self.config.max_results);
        products
    }
}

/// Keep what succeeded, log what didn't.
fn merge_outcomes(outcomes: Vec<(SourceId, Result<Vec<Product>, AppError>)>) -> Vec<Product> {
    let mut merged = Vec::new();
    for (source, outcome) in outcomes {
        match outcome {
            Ok(items) => merged.extend(items),
            Err(e) => {
                tracing::error!(source = source.name(), error = %e, "source scrape failed");
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;

    fn test_scraper_config(sources: &str) -> ScraperConfig {
        ScraperConfig {
            user_agent: "dealfinder-test/1.0".to_owned(),
            request_timeout_seconds: 5,
            sources: sources.split(',').map(str::to_owned).collect(),
            max_results: 150,
            browser_page_wait_ms: 0,
        }
    }

    fn no_proxy() -> ProxyConfig {
        ProxyConfig {
            server: None,
            username: None,
            password: None,
        }
    }

    fn product(id: &str, source: &str) -> Product {
        Product {
            id: id.to_owned(),
            name: format!("item {id}"),
            price: 100,
            image: None,
            source: source.to_owned(),
            url: format!("https://example.com/{id}"),
            rating: 4.0,
        }
    }

    #[test]
    fn unknown_source_name_is_rejected_at_startup() {
        let cfg = test_scraper_config("jumia,ebay");
        let err = Scraper::new(&cfg, &no_proxy()).err().expect("should fail");
        assert!(err.to_string().contains("ebay"));
    }

    #[test]
    fn duplicate_source_names_collapse() {
        let cfg = test_scraper_config("jumia,jumia,jiji");
        let s = Scraper::new(&cfg, &no_proxy()).unwrap();
        assert_eq!(s.enabled_sources(), &[SourceId::Jumia, SourceId::Jiji]);
    }

    #[test]
    fn merge_keeps_successes_and_drops_failures() {
        let outcomes = vec![
            (
                SourceId::Jumia,
                Ok(vec![product("a1", "Jumia Kenya"), product("a2", "Jumia Kenya")]),
            ),
            (
                SourceId::Kilimall,
                Err(AppError::Scraper("connect refused".into())),
            ),
            (SourceId::Jiji, Ok(vec![product("b1", "Jiji Kenya")])),
        ];

        let merged = merge_outcomes(outcomes);
        assert_eq!(merged.len(), 3);
        assert!(merged.iter().any(|p| p.id == "b1"));
    }

    #[tokio::test]
    async fn fetch_sends_configured_user_agent() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/page")
            .match_header("user-agent", "dealfinder-test/1.0")
            .with_status(200)
            .with_body("<html></html>")
            .create_async()
            .await;

        let cfg = test_scraper_config("jumia");
        let fetcher = HttpFetcher::new(&cfg, &no_proxy()).unwrap();
        let (status, body) = fetcher.fetch(&format!("{}/page", server.url())).await.unwrap();

        assert_eq!(status, 200);
        assert_eq!(body, "<html></html>");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_surfaces_status_without_failing() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/blocked")
            .with_status(403)
            .with_body("go away")
            .create_async()
            .await;

        let cfg = test_scraper_config("jumia");
        let fetcher = HttpFetcher::new(&cfg, &no_proxy()).unwrap();
        let (status, _) = fetcher
            .fetch(&format!("{}/blocked", server.url()))
            .await
            .unwrap();
        assert_eq!(status, 403);
    }

    #[tokio::test]
    async fn search_caps_and_preserves_merged_items() {
        // Pure-pipeline check through merge + shuffle + truncate.
        let mut items: Vec<Product> = (0..200)
            .map(|i| product(&format!("p{i:03}"), "Jumia Kenya"))
            .collect();

        items.shuffle(&mut rand::rng());
        items.truncate(150);

        assert_eq!(items.len(), 150);
        let unique: std::collections::HashSet<_> = items.iter().map(|p| p.id.clone()).collect();
        assert_eq!(unique.len(), 150);
    }
}
