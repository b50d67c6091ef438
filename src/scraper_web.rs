//! Generic web strategy: breadth-first crawl of an `http(s)` site.
//!
//! Per item: fetch → MIME-dispatched pipeline → Markdown document, with
//! discovered links filtered by crawl scope, include/exclude patterns,
//! and an optional follow predicate (used by the source-specialized
//! strategies that compose this one).

use async_trait::async_trait;
use tracing::warn;
use url::Url;

use crate::cancel::CancellationToken;
use crate::error::{DocdexError, Result};
use crate::fetcher::{FetchOptions, Fetcher};
use crate::fetcher_http::HttpFetcher;
use crate::pipelines::{select_pipeline, standard_pipelines, ContentPipeline};
use crate::scraper::{
    run_crawl, CrawlItem, CrawlProcessor, ItemResult, PageDocument, PatternFilter, ProgressSender,
    ScrapeMode, ScrapeOptions, ScraperStrategy,
};
use crate::urls::{in_scope, NormalizeOptions};

/// Decides whether a discovered link may be followed, beyond the scope
/// check. `None` follows everything in scope.
pub type FollowPredicate = fn(base: &Url, target: &Url) -> bool;

pub struct WebScraperStrategy {
    fetcher: HttpFetcher,
    pipelines: Vec<Box<dyn ContentPipeline>>,
    normalize: NormalizeOptions,
    follow: Option<FollowPredicate>,
}

impl WebScraperStrategy {
    pub fn new() -> Result<Self> {
        Ok(Self {
            fetcher: HttpFetcher::new()?,
            pipelines: standard_pipelines(),
            normalize: NormalizeOptions::default(),
            follow: None,
        })
    }

    /// Variant used by the source-specialized strategies.
    pub fn with_policy(normalize: NormalizeOptions, follow: Option<FollowPredicate>) -> Result<Self> {
        Ok(Self {
            fetcher: HttpFetcher::new()?,
            pipelines: standard_pipelines(),
            normalize,
            follow,
        })
    }
}

#[async_trait]
impl ScraperStrategy for WebScraperStrategy {
    fn can_handle(&self, url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    async fn scrape(
        &self,
        options: &ScrapeOptions,
        progress: ProgressSender,
        signal: CancellationToken,
    ) -> Result<()> {
        if options.scrape_mode == ScrapeMode::Playwright {
            warn!("browser rendering is not available; using the plain HTTP fetcher");
        }
        run_crawl(self, options, &progress, &signal).await
    }
}

#[async_trait]
impl CrawlProcessor for WebScraperStrategy {
    fn normalize_options(&self) -> NormalizeOptions {
        self.normalize.clone()
    }

    async fn process_item(
        &self,
        item: &CrawlItem,
        options: &ScrapeOptions,
        signal: &CancellationToken,
    ) -> Result<ItemResult> {
        let fetch_options = FetchOptions {
            headers: options.headers.clone(),
            follow_redirects: options.follow_redirects,
            signal: signal.clone(),
            ..FetchOptions::default()
        };
        let raw = self.fetcher.fetch(&item.url, &fetch_options).await?;

        let Some(pipeline) = select_pipeline(&self.pipelines, &raw) else {
            warn!(url = %item.url, mime = %raw.mime_type, "unsupported content type, skipping");
            return Ok(ItemResult::default());
        };
        let processed = pipeline
            .process(&raw)
            .await
            .map_err(|e| DocdexError::Processing {
                url: item.url.to_string(),
                reason: e.to_string(),
            })?;
        for error in &processed.errors {
            warn!(url = %item.url, %error, "processing note");
        }

        let links = self.filter_links(options, &processed.links)?;

        if processed.content.trim().is_empty() {
            warn!(url = %item.url, "page produced no content, skipping");
            return Ok(ItemResult {
                document: None,
                links,
            });
        }

        Ok(ItemResult {
            document: Some(PageDocument {
                content: processed.content,
                url: raw.source_url,
                title: processed
                    .title
                    .unwrap_or_else(|| "Untitled".to_string()),
            }),
            links,
        })
    }
}

impl WebScraperStrategy {
    fn filter_links(&self, options: &ScrapeOptions, links: &[String]) -> Result<Vec<String>> {
        let base = Url::parse(&options.url).map_err(|e| DocdexError::InvalidUrl {
            url: options.url.clone(),
            reason: e.to_string(),
        })?;
        let patterns = PatternFilter::new(&options.include_patterns, &options.exclude_patterns)?;

        Ok(links
            .iter()
            .filter(|link| {
                let Ok(target) = Url::parse(link) else {
                    return false;
                };
                in_scope(&base, &target, options.scope)
                    && patterns.matches(target.path())
                    && self.follow.map_or(true, |follow| follow(&base, &target))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_only_in_scope_links() {
        let strategy = WebScraperStrategy::new().unwrap();
        let options = ScrapeOptions::new("https://a.com/docs/start", "alib", "");
        let links = vec![
            "https://a.com/docs/intro".to_string(),
            "https://a.com/api".to_string(),
            "https://b.com/docs/x".to_string(),
            "not a url".to_string(),
        ];
        let kept = strategy.filter_links(&options, &links).unwrap();
        assert_eq!(kept, vec!["https://a.com/docs/intro"]);
    }

    #[test]
    fn exclude_patterns_prune_links() {
        let strategy = WebScraperStrategy::new().unwrap();
        let mut options = ScrapeOptions::new("https://a.com/docs/", "alib", "");
        options.exclude_patterns = vec!["**/v1/**".to_string()];
        let links = vec![
            "https://a.com/docs/v2/intro".to_string(),
            "https://a.com/docs/v1/intro".to_string(),
        ];
        let kept = strategy.filter_links(&options, &links).unwrap();
        assert_eq!(kept, vec!["https://a.com/docs/v2/intro"]);
    }

    #[test]
    fn follow_predicate_is_consulted() {
        fn never(_: &Url, _: &Url) -> bool {
            false
        }
        let strategy =
            WebScraperStrategy::with_policy(NormalizeOptions::default(), Some(never)).unwrap();
        let options = ScrapeOptions::new("https://a.com/docs/", "alib", "");
        let kept = strategy
            .filter_links(&options, &["https://a.com/docs/page".to_string()])
            .unwrap();
        assert!(kept.is_empty());
    }
}
