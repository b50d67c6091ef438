//! Strategies for package-registry documentation pages (npm, PyPI).
//!
//! Both are the plain web crawl with one twist: these sites encode
//! navigation state in the query string (`?tab=readme`, `?activeTab=…`),
//! so URL normalization strips queries to keep the `visited` set from
//! treating every tab as a new page.

use async_trait::async_trait;
use url::Url;

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::scraper::{ProgressSender, ScrapeOptions, ScraperStrategy};
use crate::scraper_web::WebScraperStrategy;
use crate::urls::NormalizeOptions;

fn host_matches(url: &str, hosts: &[&str]) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .map(|host| hosts.contains(&host.as_str()))
        .unwrap_or(false)
}

pub struct NpmScraperStrategy {
    web: WebScraperStrategy,
}

impl NpmScraperStrategy {
    pub fn new() -> Result<Self> {
        Ok(Self {
            web: WebScraperStrategy::with_policy(NormalizeOptions::stripping_query(), None)?,
        })
    }
}

#[async_trait]
impl ScraperStrategy for NpmScraperStrategy {
    fn can_handle(&self, url: &str) -> bool {
        host_matches(url, &["npmjs.com", "www.npmjs.com", "npmjs.org", "www.npmjs.org"])
    }

    async fn scrape(
        &self,
        options: &ScrapeOptions,
        progress: ProgressSender,
        signal: CancellationToken,
    ) -> Result<()> {
        self.web.scrape(options, progress, signal).await
    }
}

pub struct PyPiScraperStrategy {
    web: WebScraperStrategy,
}

impl PyPiScraperStrategy {
    pub fn new() -> Result<Self> {
        Ok(Self {
            web: WebScraperStrategy::with_policy(NormalizeOptions::stripping_query(), None)?,
        })
    }
}

#[async_trait]
impl ScraperStrategy for PyPiScraperStrategy {
    fn can_handle(&self, url: &str) -> bool {
        host_matches(url, &["pypi.org", "www.pypi.org", "pypi.python.org"])
    }

    async fn scrape(
        &self,
        options: &ScrapeOptions,
        progress: ProgressSender,
        signal: CancellationToken,
    ) -> Result<()> {
        self.web.scrape(options, progress, signal).await
    }
}
