//! Scraper strategies: per-source-family crawl policies.
//!
//! A strategy implements [`ScraperStrategy`]: `can_handle` routes a URL to
//! the right strategy (first match wins in the [`StrategyRegistry`]), and
//! `scrape` drives the fetch→process→emit loop, reporting progress through
//! an mpsc channel and honoring a cancellation token.
//!
//! Most strategies share the bounded breadth-first crawl in [`run_crawl`]:
//! the queue holds `(url, depth)` entries, a batch of up to
//! `max_concurrency` items is processed concurrently, and newly discovered
//! links are deduplicated against the normalized `visited` set after the
//! batch completes, so duplicates discovered within one batch enqueue at
//! most once.

use async_trait::async_trait;
use futures::future::join_all;
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::error::{DocdexError, Result};
use crate::urls::{normalize_url, NormalizeOptions, Scope};

/// Canonical scrape request options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeOptions {
    /// Start URL; `http(s)` or `file://`.
    pub url: String,
    /// Library the scraped chunks are indexed under (lowercased internally).
    pub library: String,
    /// Version partition; empty means unversioned.
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub scope: Scope,
    /// Globs or `/regex/` patterns; a link must match one when non-empty.
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Globs or `/regex/` patterns; a match always wins over include.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub scrape_mode: ScrapeMode,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    #[serde(default = "default_true")]
    pub ignore_errors: bool,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_max_pages() -> usize {
    1000
}
fn default_max_depth() -> usize {
    3
}
fn default_max_concurrency() -> usize {
    3
}
fn default_true() -> bool {
    true
}

impl ScrapeOptions {
    pub fn new(url: impl Into<String>, library: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            library: library.into(),
            version: version.into(),
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            max_concurrency: default_max_concurrency(),
            scope: Scope::default(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            scrape_mode: ScrapeMode::default(),
            follow_redirects: true,
            ignore_errors: true,
            headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScrapeMode {
    #[default]
    Auto,
    Fetch,
    /// Accepted for compatibility; no browser fetcher is shipped, so this
    /// falls back to the plain HTTP fetcher with a warning.
    Playwright,
    GithubMarkdown,
}

/// One page-level document produced by a strategy, pre-split.
#[derive(Debug, Clone)]
pub struct PageDocument {
    pub content: String,
    pub url: String,
    pub title: String,
}

/// Progress event delivered while a scrape runs. `document` is present
/// when the item produced indexable content.
#[derive(Debug, Clone)]
pub struct ScrapeProgress {
    pub pages_scraped: usize,
    pub max_pages: usize,
    pub current_url: String,
    pub depth: usize,
    pub max_depth: usize,
    pub document: Option<PageDocument>,
}

pub type ProgressSender = mpsc::Sender<ScrapeProgress>;

#[async_trait]
pub trait ScraperStrategy: Send + Sync {
    /// Whether this strategy accepts the URL.
    fn can_handle(&self, url: &str) -> bool;

    /// Run the scrape, emitting progress events until done or cancelled.
    async fn scrape(
        &self,
        options: &ScrapeOptions,
        progress: ProgressSender,
        signal: CancellationToken,
    ) -> Result<()>;
}

/// First-match registry of scraper strategies.
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn ScraperStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// The standard strategy set. Source-specialized strategies register
    /// before the generic web strategy so they win the match.
    pub fn standard() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::scraper_github::GitHubScraperStrategy::new()?));
        registry.register(Arc::new(crate::scraper_registry_sites::NpmScraperStrategy::new()?));
        registry.register(Arc::new(crate::scraper_registry_sites::PyPiScraperStrategy::new()?));
        registry.register(Arc::new(crate::scraper_local::LocalFileStrategy::new()));
        registry.register(Arc::new(crate::scraper_web::WebScraperStrategy::new()?));
        Ok(registry)
    }

    pub fn register(&mut self, strategy: Arc<dyn ScraperStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn find(&self, url: &str) -> Option<Arc<dyn ScraperStrategy>> {
        self.strategies
            .iter()
            .find(|s| s.can_handle(url))
            .cloned()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Include / exclude patterns ============

/// Compiled include/exclude patterns. A string wrapped in `/.../` is a
/// regex; anything else is a glob. Exclude always wins; an empty include
/// set admits everything.
pub struct PatternFilter {
    include_globs: GlobSet,
    include_regexes: Vec<Regex>,
    has_includes: bool,
    exclude_globs: GlobSet,
    exclude_regexes: Vec<Regex>,
}

impl PatternFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let (include_globs, include_regexes) = compile_patterns(include)?;
        let (exclude_globs, exclude_regexes) = compile_patterns(exclude)?;
        Ok(Self {
            include_globs,
            include_regexes,
            has_includes: !include.is_empty(),
            exclude_globs,
            exclude_regexes,
        })
    }

    pub fn matches(&self, target: &str) -> bool {
        if self.exclude_globs.is_match(target)
            || self.exclude_regexes.iter().any(|re| re.is_match(target))
        {
            return false;
        }
        if !self.has_includes {
            return true;
        }
        self.include_globs.is_match(target)
            || self.include_regexes.iter().any(|re| re.is_match(target))
    }
}

fn compile_patterns(patterns: &[String]) -> Result<(GlobSet, Vec<Regex>)> {
    let mut globs = GlobSetBuilder::new();
    let mut regexes = Vec::new();
    for pattern in patterns {
        if let Some(inner) = pattern
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            regexes.push(Regex::new(inner).map_err(|e| {
                DocdexError::Other(format!("invalid regex pattern '{pattern}': {e}"))
            })?);
        } else {
            globs.add(Glob::new(pattern).map_err(|e| {
                DocdexError::Other(format!("invalid glob pattern '{pattern}': {e}"))
            })?);
        }
    }
    let globs = globs
        .build()
        .map_err(|e| DocdexError::Other(format!("building glob set: {e}")))?;
    Ok((globs, regexes))
}

// ============ Shared breadth-first crawl ============

#[derive(Debug, Clone)]
pub struct CrawlItem {
    pub url: String,
    pub depth: usize,
}

/// Result of processing a single crawl item.
#[derive(Debug, Default)]
pub struct ItemResult {
    pub document: Option<PageDocument>,
    pub links: Vec<String>,
}

/// One strategy's per-item behavior, plugged into [`run_crawl`].
#[async_trait]
pub(crate) trait CrawlProcessor: Send + Sync {
    async fn process_item(
        &self,
        item: &CrawlItem,
        options: &ScrapeOptions,
        signal: &CancellationToken,
    ) -> Result<ItemResult>;

    /// Normalization applied before the `visited` check.
    fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions::default()
    }
}

/// Bounded breadth-first crawl shared by the web-family strategies.
pub(crate) async fn run_crawl(
    processor: &dyn CrawlProcessor,
    options: &ScrapeOptions,
    progress: &ProgressSender,
    signal: &CancellationToken,
) -> Result<()> {
    let normalize = processor.normalize_options();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<CrawlItem> = VecDeque::new();

    visited.insert(normalize_url(&options.url, &normalize));
    queue.push_back(CrawlItem {
        url: options.url.clone(),
        depth: 0,
    });

    let mut pages = 0usize;
    while !queue.is_empty() && pages < options.max_pages {
        if signal.is_cancelled() {
            return Err(DocdexError::Cancelled);
        }
        let batch_size = options
            .max_concurrency
            .max(1)
            .min(options.max_pages - pages)
            .min(queue.len());
        let batch: Vec<CrawlItem> = queue.drain(..batch_size).collect();

        let results = join_all(batch.iter().map(|item| async {
            if item.depth > options.max_depth {
                return Ok(ItemResult::default());
            }
            processor.process_item(item, options, signal).await
        }))
        .await;

        let mut discovered: Vec<(String, usize)> = Vec::new();
        for (item, result) in batch.iter().zip(results) {
            match result {
                Ok(outcome) => {
                    if let Some(document) = outcome.document {
                        pages += 1;
                        let event = ScrapeProgress {
                            pages_scraped: pages,
                            max_pages: options.max_pages,
                            current_url: item.url.clone(),
                            depth: item.depth,
                            max_depth: options.max_depth,
                            document: Some(document),
                        };
                        if progress.send(event).await.is_err() {
                            // Receiver gone; nothing left to report to.
                            return Ok(());
                        }
                    }
                    for link in outcome.links {
                        discovered.push((link, item.depth + 1));
                    }
                }
                Err(DocdexError::Cancelled) => return Err(DocdexError::Cancelled),
                Err(e) if options.ignore_errors => {
                    warn!(url = %item.url, error = %e, "page failed, continuing");
                }
                Err(e) => return Err(e),
            }
        }

        // Dedup after the batch so same-batch duplicates queue once.
        for (link, depth) in discovered {
            let normalized = normalize_url(&link, &normalize);
            if visited.insert(normalized) {
                queue.push_back(CrawlItem { url: link, depth });
            }
        }
        debug!(
            pages,
            queued = queue.len(),
            "crawl batch complete"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Processor over a synthetic link graph, tracking peak concurrency.
    struct GraphProcessor {
        links: HashMap<String, Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl GraphProcessor {
        fn new(edges: &[(&str, &[&str])]) -> Self {
            Self {
                links: edges
                    .iter()
                    .map(|(from, to)| {
                        (from.to_string(), to.iter().map(|s| s.to_string()).collect())
                    })
                    .collect(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CrawlProcessor for GraphProcessor {
        async fn process_item(
            &self,
            item: &CrawlItem,
            _options: &ScrapeOptions,
            _signal: &CancellationToken,
        ) -> Result<ItemResult> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ItemResult {
                document: Some(PageDocument {
                    content: format!("content of {}", item.url),
                    url: item.url.clone(),
                    title: "T".to_string(),
                }),
                links: self.links.get(&item.url).cloned().unwrap_or_default(),
            })
        }
    }

    async fn crawl(
        processor: &GraphProcessor,
        options: &ScrapeOptions,
    ) -> Vec<ScrapeProgress> {
        let (tx, mut rx) = mpsc::channel(256);
        run_crawl(processor, options, &tx, &CancellationToken::new())
            .await
            .unwrap();
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn crawled_urls(events: &[ScrapeProgress]) -> Vec<String> {
        events.iter().map(|e| e.current_url.clone()).collect()
    }

    #[tokio::test]
    async fn max_pages_bounds_the_crawl() {
        let processor = GraphProcessor::new(&[
            ("https://a.com/docs", &["https://a.com/docs/1", "https://a.com/docs/2"]),
            ("https://a.com/docs/1", &["https://a.com/docs/3"]),
        ]);
        let mut options = ScrapeOptions::new("https://a.com/docs", "lib", "");
        options.max_pages = 2;
        let events = crawl(&processor, &options).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].pages_scraped, 1);
        assert_eq!(events[1].pages_scraped, 2);
    }

    #[tokio::test]
    async fn depth_zero_scrapes_only_the_start_url() {
        let processor = GraphProcessor::new(&[(
            "https://a.com/docs",
            &["https://a.com/docs/1", "https://a.com/docs/2"],
        )]);
        let mut options = ScrapeOptions::new("https://a.com/docs", "lib", "");
        options.max_pages = 1;
        options.max_depth = 0;
        let events = crawl(&processor, &options).await;
        assert_eq!(crawled_urls(&events), vec!["https://a.com/docs"]);
    }

    #[tokio::test]
    async fn links_seen_in_the_same_batch_enqueue_once() {
        // Both children link to the same grandchild; it must be crawled once.
        let processor = GraphProcessor::new(&[
            ("https://a.com/d", &["https://a.com/d/1", "https://a.com/d/2"]),
            ("https://a.com/d/1", &["https://a.com/d/shared"]),
            ("https://a.com/d/2", &["https://a.com/d/shared", "https://a.com/d/Shared#frag"]),
        ]);
        let options = ScrapeOptions::new("https://a.com/d", "lib", "");
        let events = crawl(&processor, &options).await;
        let shared = crawled_urls(&events)
            .iter()
            .filter(|u| u.to_lowercase().contains("shared"))
            .count();
        assert_eq!(shared, 1);
    }

    #[tokio::test]
    async fn concurrency_one_is_strictly_sequential() {
        let processor = GraphProcessor::new(&[(
            "https://a.com/d",
            &["https://a.com/d/1", "https://a.com/d/2", "https://a.com/d/3"],
        )]);
        let mut options = ScrapeOptions::new("https://a.com/d", "lib", "");
        options.max_concurrency = 1;
        crawl(&processor, &options).await;
        assert_eq!(processor.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_between_batches() {
        let processor = GraphProcessor::new(&[(
            "https://a.com/d",
            &["https://a.com/d/1", "https://a.com/d/2"],
        )]);
        let options = ScrapeOptions::new("https://a.com/d", "lib", "");
        let (tx, _rx) = mpsc::channel(256);
        let signal = CancellationToken::new();
        signal.cancel();
        let result = run_crawl(&processor, &options, &tx, &signal).await;
        assert!(matches!(result, Err(DocdexError::Cancelled)));
    }

    #[test]
    fn defaults_deserialize_from_minimal_json() {
        let options: ScrapeOptions = serde_json::from_str(
            r#"{"url": "https://a.com/docs", "library": "alib"}"#,
        )
        .unwrap();
        assert_eq!(options.version, "");
        assert_eq!(options.max_pages, 1000);
        assert_eq!(options.max_depth, 3);
        assert_eq!(options.max_concurrency, 3);
        assert_eq!(options.scope, Scope::Subpages);
        assert_eq!(options.scrape_mode, ScrapeMode::Auto);
        assert!(options.follow_redirects);
        assert!(options.ignore_errors);
    }

    #[test]
    fn scrape_mode_uses_kebab_case() {
        let options: ScrapeOptions = serde_json::from_str(
            r#"{"url": "https://github.com/a/b", "library": "b", "scrapeMode": "github-markdown"}"#,
        )
        .unwrap();
        assert_eq!(options.scrape_mode, ScrapeMode::GithubMarkdown);
    }

    #[test]
    fn exclude_wins_over_include() {
        let filter = PatternFilter::new(
            &["**/docs/**".to_string()],
            &["**/docs/internal/**".to_string()],
        )
        .unwrap();
        assert!(filter.matches("https://a.com/docs/guide"));
        assert!(!filter.matches("https://a.com/docs/internal/secret"));
        assert!(!filter.matches("https://a.com/blog/post"));
    }

    #[test]
    fn slash_wrapped_patterns_are_regexes() {
        let filter =
            PatternFilter::new(&[r"/\.mdx?$/".to_string()], &[]).unwrap();
        assert!(filter.matches("guide.md"));
        assert!(filter.matches("guide.mdx"));
        assert!(!filter.matches("guide.html"));
    }

    #[test]
    fn empty_includes_admit_everything() {
        let filter = PatternFilter::new(&[], &[]).unwrap();
        assert!(filter.matches("anything/at/all"));
    }
}
