//! Fetcher capability: retrieve raw bytes from a URL.
//!
//! Fetchers never follow links or parse content; they hand back a
//! [`RawContent`] with a MIME type for the pipeline dispatch. Concrete
//! fetchers: [`crate::fetcher_http::HttpFetcher`],
//! [`crate::fetcher_file::FileFetcher`], and
//! [`crate::fetcher_github::GitHubMarkdownFetcher`].

use async_trait::async_trait;
use std::collections::HashMap;

use crate::cancel::CancellationToken;
use crate::error::{DocdexError, Result};
use crate::models::RawContent;

/// Per-fetch options threaded in by the scraping strategy.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Extra request headers (static header injection only).
    pub headers: HashMap<String, String>,
    pub follow_redirects: bool,
    pub signal: CancellationToken,
    /// Maximum retry attempts for retriable (4xx) responses.
    pub max_retries: u32,
    /// Base delay for exponential backoff, milliseconds.
    pub base_delay_ms: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            headers: HashMap::new(),
            follow_redirects: true,
            signal: CancellationToken::new(),
            max_retries: 6,
            base_delay_ms: 1000,
        }
    }
}

impl FetchOptions {
    /// Retry tuning must be positive; violations fail fast rather than
    /// silently disabling backoff.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(DocdexError::Other(
                "max_retries must be a positive integer".to_string(),
            ));
        }
        if self.base_delay_ms == 0 {
            return Err(DocdexError::Other(
                "base_delay_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Whether this fetcher understands the URL.
    fn can_fetch(&self, url: &str) -> bool;

    /// Retrieve the raw bytes behind `url`.
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<RawContent>;
}

/// Split a `Content-Type` header into MIME type and charset.
pub(crate) fn parse_content_type(header: &str) -> (String, Option<String>) {
    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or("").trim().to_lowercase();
    let charset = parts
        .filter_map(|p| p.trim().strip_prefix("charset="))
        .next()
        .map(|c| c.trim_matches('"').to_lowercase());
    (mime, charset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_splits_mime_and_charset() {
        assert_eq!(
            parse_content_type("text/html; charset=UTF-8"),
            ("text/html".to_string(), Some("utf-8".to_string()))
        );
        assert_eq!(
            parse_content_type("application/json"),
            ("application/json".to_string(), None)
        );
    }

    #[test]
    fn zero_retry_settings_fail_fast() {
        let mut opts = FetchOptions::default();
        assert!(opts.validate().is_ok());
        opts.max_retries = 0;
        assert!(opts.validate().is_err());
        opts.max_retries = 6;
        opts.base_delay_ms = 0;
        assert!(opts.validate().is_err());
    }
}
