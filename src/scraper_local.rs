//! Local file tree strategy for `file://` URLs.
//!
//! Directories are treated as pages whose "links" are their entries, so
//! the shared breadth-first crawl handles recursion, depth limits, and
//! page budgets unchanged. Files go through the file fetcher (which
//! percent-decodes the path) and the MIME-dispatched pipelines; binary
//! files are skipped. Include/exclude patterns apply to the decoded
//! filesystem path, and exclude wins.

use async_trait::async_trait;
use tracing::warn;
use url::Url;

use crate::cancel::CancellationToken;
use crate::error::{DocdexError, Result};
use crate::fetcher::{FetchOptions, Fetcher};
use crate::fetcher_file::FileFetcher;
use crate::pipelines::{select_pipeline, standard_pipelines, ContentPipeline};
use crate::scraper::{
    run_crawl, CrawlItem, CrawlProcessor, ItemResult, PageDocument, PatternFilter, ProgressSender,
    ScrapeOptions, ScraperStrategy,
};
use crate::urls::NormalizeOptions;

pub struct LocalFileStrategy {
    fetcher: FileFetcher,
    pipelines: Vec<Box<dyn ContentPipeline>>,
}

impl LocalFileStrategy {
    pub fn new() -> Self {
        Self {
            fetcher: FileFetcher::new(),
            pipelines: standard_pipelines(),
        }
    }
}

impl Default for LocalFileStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScraperStrategy for LocalFileStrategy {
    fn can_handle(&self, url: &str) -> bool {
        url.starts_with("file://")
    }

    async fn scrape(
        &self,
        options: &ScrapeOptions,
        progress: ProgressSender,
        signal: CancellationToken,
    ) -> Result<()> {
        run_crawl(self, options, &progress, &signal).await
    }
}

#[async_trait]
impl CrawlProcessor for LocalFileStrategy {
    /// Filesystem paths are case-sensitive; keep them verbatim.
    fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            lowercase: false,
            collapse_index: false,
            ..NormalizeOptions::default()
        }
    }

    async fn process_item(
        &self,
        item: &CrawlItem,
        options: &ScrapeOptions,
        _signal: &CancellationToken,
    ) -> Result<ItemResult> {
        let url = Url::parse(&item.url).map_err(|e| DocdexError::InvalidUrl {
            url: item.url.clone(),
            reason: e.to_string(),
        })?;
        let path = url.to_file_path().map_err(|_| DocdexError::InvalidUrl {
            url: item.url.clone(),
            reason: "not a local file path".to_string(),
        })?;

        if path.is_dir() {
            let mut links = Vec::new();
            let mut entries = tokio::fs::read_dir(&path).await?;
            while let Some(entry) = entries.next_entry().await? {
                if let Ok(entry_url) = Url::from_file_path(entry.path()) {
                    links.push(entry_url.to_string());
                }
            }
            links.sort();
            return Ok(ItemResult {
                document: None,
                links,
            });
        }

        let patterns = PatternFilter::new(&options.include_patterns, &options.exclude_patterns)?;
        if !patterns.matches(&path.to_string_lossy()) {
            return Ok(ItemResult::default());
        }

        let raw = self.fetcher.fetch(&item.url, &FetchOptions::default()).await?;
        let Some(pipeline) = select_pipeline(&self.pipelines, &raw) else {
            warn!(url = %item.url, mime = %raw.mime_type, "binary file, skipping");
            return Ok(ItemResult::default());
        };
        let processed = pipeline
            .process(&raw)
            .await
            .map_err(|e| DocdexError::Processing {
                url: item.url.clone(),
                reason: e.to_string(),
            })?;
        if processed.content.trim().is_empty() {
            return Ok(ItemResult::default());
        }

        let title = processed.title.unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Untitled".to_string())
        });
        Ok(ItemResult {
            document: Some(PageDocument {
                content: processed.content,
                url: item.url.clone(),
                title,
            }),
            // Links inside file content are not followed; the directory
            // listing drives the crawl.
            links: Vec::new(),
        })
    }
}
