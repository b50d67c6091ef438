//! Fetcher that turns a GitHub repository into one Markdown document.
//!
//! Recognizes `github.com/<owner>/<repo>` URLs, lists the repository's
//! Markdown files through the REST API (default branch, recursive git
//! tree), downloads each through `raw.githubusercontent.com`, and
//! concatenates everything into a single `text/markdown` payload. Used by
//! the `github-markdown` scrape mode, which indexes a repo in one shot
//! instead of crawling its HTML views.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::{DocdexError, Result};
use crate::fetcher::{FetchOptions, Fetcher};
use crate::models::RawContent;

const USER_AGENT: &str = concat!("docdex/", env!("CARGO_PKG_VERSION"));
const MARKDOWN_EXTENSIONS: &[&str] = &[".md", ".mdx", ".markdown"];
/// Upper bound on files pulled from one repository.
const MAX_FILES: usize = 300;

pub struct GitHubMarkdownFetcher {
    client: reqwest::Client,
}

impl GitHubMarkdownFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DocdexError::Other(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| DocdexError::FetchTransport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(DocdexError::FetchTransport {
                url: url.to_string(),
                reason: format!("GitHub API returned status {status}"),
            });
        }
        response
            .json()
            .await
            .map_err(|e| DocdexError::FetchTransport {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Extract `(owner, repo)` from a GitHub repository URL.
pub(crate) fn parse_repo_url(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    if !matches!(parsed.host_str(), Some("github.com") | Some("www.github.com")) {
        return None;
    }
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?.to_string();
    let repo = segments.next()?.trim_end_matches(".git").to_string();
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner, repo))
}

fn is_markdown_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    MARKDOWN_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

#[async_trait]
impl Fetcher for GitHubMarkdownFetcher {
    fn can_fetch(&self, url: &str) -> bool {
        parse_repo_url(url).is_some()
    }

    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<RawContent> {
        let (owner, repo) = parse_repo_url(url).ok_or_else(|| DocdexError::InvalidUrl {
            url: url.to_string(),
            reason: "not a github.com/<owner>/<repo> URL".to_string(),
        })?;

        let meta = self
            .get_json(&format!("https://api.github.com/repos/{owner}/{repo}"))
            .await?;
        let branch = meta
            .get("default_branch")
            .and_then(|b| b.as_str())
            .unwrap_or("main")
            .to_string();

        let tree = self
            .get_json(&format!(
                "https://api.github.com/repos/{owner}/{repo}/git/trees/{branch}?recursive=1"
            ))
            .await?;
        let mut paths: Vec<String> = tree
            .get("tree")
            .and_then(|t| t.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.get("type").and_then(|t| t.as_str()) == Some("blob"))
                    .filter_map(|e| e.get("path").and_then(|p| p.as_str()))
                    .filter(|p| is_markdown_path(p))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        paths.sort();
        if paths.len() > MAX_FILES {
            warn!(
                %owner,
                %repo,
                total = paths.len(),
                kept = MAX_FILES,
                "repository has more markdown files than the fetch limit"
            );
            paths.truncate(MAX_FILES);
        }
        debug!(%owner, %repo, %branch, files = paths.len(), "fetching repository markdown");

        let mut combined = String::new();
        for path in &paths {
            if options.signal.is_cancelled() {
                return Err(DocdexError::Cancelled);
            }
            let raw_url = format!(
                "https://raw.githubusercontent.com/{owner}/{repo}/{branch}/{path}"
            );
            let response = match self.client.get(&raw_url).send().await {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    warn!(%path, status = r.status().as_u16(), "skipping file");
                    continue;
                }
                Err(e) => {
                    warn!(%path, error = %e, "skipping file");
                    continue;
                }
            };
            let text = response.text().await.unwrap_or_default();
            if text.trim().is_empty() {
                continue;
            }
            if !combined.is_empty() {
                combined.push_str("\n\n");
            }
            combined.push_str(&format!("<!-- Source: {path} -->\n\n"));
            combined.push_str(&text);
        }

        Ok(RawContent {
            content: combined.into_bytes(),
            mime_type: "text/markdown".to_string(),
            charset: Some("utf-8".to_string()),
            source_url: url.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_repository_urls() {
        assert_eq!(
            parse_repo_url("https://github.com/rust-lang/rust"),
            Some(("rust-lang".to_string(), "rust".to_string()))
        );
        assert_eq!(
            parse_repo_url("https://github.com/rust-lang/rust.git"),
            Some(("rust-lang".to_string(), "rust".to_string()))
        );
        assert_eq!(
            parse_repo_url("https://github.com/rust-lang/rust/tree/master/src"),
            Some(("rust-lang".to_string(), "rust".to_string()))
        );
        assert_eq!(parse_repo_url("https://github.com/onlyowner"), None);
        assert_eq!(parse_repo_url("https://gitlab.com/a/b"), None);
    }

    #[test]
    fn markdown_extension_filter() {
        assert!(is_markdown_path("README.md"));
        assert!(is_markdown_path("docs/Guide.MDX"));
        assert!(is_markdown_path("notes.markdown"));
        assert!(!is_markdown_path("src/lib.rs"));
        assert!(!is_markdown_path("README"));
    }
}
