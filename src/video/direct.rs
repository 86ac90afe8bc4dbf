use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use thirtyfour::prelude::*;
use thirtyfour::ChromiumLikeCapabilities;

use crate::errors::{RelayError, RelayResult};
use crate::video::{patterns, MediaLocator, Strategy, ACCEPT_LANGUAGE, USER_AGENT};

const SCROLL_STEPS: usize = 12;
const SCROLL_PAUSE: Duration = Duration::from_millis(400);

/// How the product page is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSource {
    /// A WebDriver endpoint (e.g. chromedriver on `http://localhost:9515`).
    Browser { webdriver_url: String },
    Http,
}

pub struct DirectPageStrategy {
    http: reqwest::Client,
    source: PageSource,
    cookies: String,
    page_timeout: Duration,
}

fn extraction_error(url: &str, e: impl std::fmt::Display) -> RelayError {
    RelayError::ExtractionFailed(format!("{url}: {e}"))
}

impl DirectPageStrategy {
    pub fn new(
        http: reqwest::Client,
        source: PageSource,
        cookies: String,
        page_timeout: Duration,
    ) -> Self {
        Self {
            http,
            source,
            cookies,
            page_timeout,
        }
    }

    async fn page_via_http(&self, url: &str) -> RelayResult<String> {
        let resp = self
            .http
            .get(url)
            .timeout(self.page_timeout)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, "text/html,application/xhtml+xml,*/*;q=0.8")
            .header(header::ACCEPT_LANGUAGE, ACCEPT_LANGUAGE)
            .header(header::COOKIE, &self.cookies)
            .send()
            .await
            .map_err(|e| extraction_error(url, e))?;
        if !resp.status().is_success() {
            return Err(extraction_error(
                url,
                format!("page returned {}", resp.status()),
            ));
        }
        resp.text().await.map_err(|e| extraction_error(url, e))
    }

    async fn scroll_and_capture(driver: &WebDriver, url: &str) -> WebDriverResult<String> {
        if let Err(e) = driver.goto(url).await {
            // Pages with long-polling requests often time out while still usable.
            log::info!("Page load did not settle: {e:?}");
        }
        for _ in 0..SCROLL_STEPS {
            driver
                .execute("window.scrollBy(0, 1000);", Vec::new())
                .await?;
            tokio::time::sleep(SCROLL_PAUSE).await;
        }
        driver.source().await
    }

    async fn page_via_browser(&self, webdriver_url: &str, url: &str) -> RelayResult<String> {
        let mut caps = DesiredCapabilities::chrome();
        caps.set_headless().map_err(|e| extraction_error(url, e))?;
        caps.add_arg(&format!("--user-agent={USER_AGENT}"))
            .map_err(|e| extraction_error(url, e))?;
        let driver = WebDriver::new(webdriver_url, caps)
            .await
            .map_err(|e| extraction_error(url, format!("cannot reach WebDriver: {e}")))?;
        driver
            .set_page_load_timeout(self.page_timeout)
            .await
            .map_err(|e| extraction_error(url, e))?;

        let html = Self::scroll_and_capture(&driver, url).await;
        if let Err(e) = driver.quit().await {
            log::warn!("WebDriver session did not close cleanly: {e}");
        }
        html.map_err(|e| extraction_error(url, e))
    }
}

#[async_trait]
impl Strategy for DirectPageStrategy {
    fn name(&self) -> &'static str {
        "direct page"
    }

    async fn extract(&self, url: &str, _dest: &Path) -> RelayResult<MediaLocator> {
        let html = match &self.source {
            PageSource::Browser { webdriver_url } => {
                self.page_via_browser(webdriver_url, url).await?
            }
            PageSource::Http => self.page_via_http(url).await?,
        };
        log::debug!("Fetched {} bytes of page source from {url}", html.len());

        match patterns::find_media_url(&html) {
            Some(media_url) => {
                log::info!("Found embedded video: {media_url}");
                Ok(MediaLocator::Remote(media_url))
            }
            None => Err(RelayError::ExtractionFailed(format!(
                "no video found on {url}"
            ))),
        }
    }
}
