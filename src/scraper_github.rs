//! GitHub strategy.
//!
//! Two modes share one strategy, selected by `scrape_mode`:
//!
//! - **HTML mode** (default): crawls the repository's web views, but only
//!   follows links under the same `/<owner>/<repo>` that are the repo
//!   root, wiki pages, or `/blob/…` paths ending in `.md`. Everything
//!   else on github.com is chrome.
//! - **Markdown mode** (`github-markdown`): one call to the GitHub
//!   markdown fetcher, which returns the repository's concatenated
//!   Markdown files; discovered links are never followed.

use async_trait::async_trait;
use url::Url;

use crate::cancel::CancellationToken;
use crate::error::{DocdexError, Result};
use crate::fetcher::{FetchOptions, Fetcher};
use crate::fetcher_github::{parse_repo_url, GitHubMarkdownFetcher};
use crate::pipelines::{select_pipeline, standard_pipelines, ContentPipeline};
use crate::scraper::{
    PageDocument, ProgressSender, ScrapeMode, ScrapeOptions, ScrapeProgress, ScraperStrategy,
};
use crate::scraper_web::WebScraperStrategy;
use crate::urls::NormalizeOptions;

pub struct GitHubScraperStrategy {
    web: WebScraperStrategy,
    markdown_fetcher: GitHubMarkdownFetcher,
    pipelines: Vec<Box<dyn ContentPipeline>>,
}

impl GitHubScraperStrategy {
    pub fn new() -> Result<Self> {
        Ok(Self {
            web: WebScraperStrategy::with_policy(
                NormalizeOptions::stripping_query(),
                Some(github_should_follow),
            )?,
            markdown_fetcher: GitHubMarkdownFetcher::new()?,
            pipelines: standard_pipelines(),
        })
    }

    async fn scrape_markdown(
        &self,
        options: &ScrapeOptions,
        progress: ProgressSender,
        signal: CancellationToken,
    ) -> Result<()> {
        let fetch_options = FetchOptions {
            headers: options.headers.clone(),
            signal: signal.clone(),
            ..FetchOptions::default()
        };
        let raw = self.markdown_fetcher.fetch(&options.url, &fetch_options).await?;
        let Some(pipeline) = select_pipeline(&self.pipelines, &raw) else {
            return Ok(());
        };
        let processed = pipeline
            .process(&raw)
            .await
            .map_err(|e| DocdexError::Processing {
                url: options.url.clone(),
                reason: e.to_string(),
            })?;
        if processed.content.trim().is_empty() {
            return Ok(());
        }

        let title = processed.title.unwrap_or_else(|| {
            parse_repo_url(&options.url)
                .map(|(_, repo)| repo)
                .unwrap_or_else(|| "Untitled".to_string())
        });
        let _ = progress
            .send(ScrapeProgress {
                pages_scraped: 1,
                max_pages: 1,
                current_url: options.url.clone(),
                depth: 0,
                max_depth: 0,
                document: Some(PageDocument {
                    content: processed.content,
                    url: options.url.clone(),
                    title,
                }),
            })
            .await;
        Ok(())
    }
}

/// Follow rule for HTML mode: stay inside `/<owner>/<repo>` and only
/// descend into the repo root, the wiki, or Markdown blobs.
fn github_should_follow(base: &Url, target: &Url) -> bool {
    let Some((owner, repo)) = parse_repo_url(base.as_str()) else {
        return false;
    };
    let Some(segments) = target.path_segments() else {
        return false;
    };
    let segments: Vec<&str> = segments.filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 || segments[0] != owner || segments[1] != repo {
        return false;
    }
    match segments.get(2) {
        None => true,
        Some(&"wiki") => true,
        Some(&"blob") => segments
            .last()
            .map(|name| name.to_lowercase().ends_with(".md"))
            .unwrap_or(false),
        _ => false,
    }
}

#[async_trait]
impl ScraperStrategy for GitHubScraperStrategy {
    fn can_handle(&self, url: &str) -> bool {
        parse_repo_url(url).is_some()
    }

    async fn scrape(
        &self,
        options: &ScrapeOptions,
        progress: ProgressSender,
        signal: CancellationToken,
    ) -> Result<()> {
        match options.scrape_mode {
            ScrapeMode::GithubMarkdown => self.scrape_markdown(options, progress, signal).await,
            _ => self.web.scrape(options, progress, signal).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn follows(base: &str, target: &str) -> bool {
        github_should_follow(&Url::parse(base).unwrap(), &Url::parse(target).unwrap())
    }

    #[test]
    fn repo_root_wiki_and_markdown_blobs_are_followed() {
        let base = "https://github.com/acme/widgets";
        assert!(follows(base, "https://github.com/acme/widgets"));
        assert!(follows(base, "https://github.com/acme/widgets/wiki/Home"));
        assert!(follows(
            base,
            "https://github.com/acme/widgets/blob/main/docs/README.md"
        ));
    }

    #[test]
    fn issues_other_repos_and_non_markdown_blobs_are_not() {
        let base = "https://github.com/acme/widgets";
        assert!(!follows(base, "https://github.com/acme/widgets/issues"));
        assert!(!follows(base, "https://github.com/acme/widgets/pulls"));
        assert!(!follows(base, "https://github.com/other/repo"));
        assert!(!follows(
            base,
            "https://github.com/acme/widgets/blob/main/src/lib.rs"
        ));
        assert!(!follows(base, "https://github.com/acme"));
    }
}
