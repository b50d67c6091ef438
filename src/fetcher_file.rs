//! Fetcher for `file://` URLs.
//!
//! Paths in file URLs are percent-encoded; `Url::to_file_path` decodes
//! them before the filesystem call. The MIME type is sniffed from the
//! extension so the pipeline dispatch can tell Markdown from HTML from
//! binary.

use async_trait::async_trait;
use url::Url;

use crate::error::{DocdexError, Result};
use crate::fetcher::{FetchOptions, Fetcher};
use crate::models::RawContent;

pub struct FileFetcher;

impl FileFetcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    fn can_fetch(&self, url: &str) -> bool {
        url.starts_with("file://")
    }

    async fn fetch(&self, url: &str, _options: &FetchOptions) -> Result<RawContent> {
        let parsed = Url::parse(url).map_err(|e| DocdexError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let path = parsed
            .to_file_path()
            .map_err(|_| DocdexError::InvalidUrl {
                url: url.to_string(),
                reason: "not a local file path".to_string(),
            })?;

        let content = tokio::fs::read(&path).await?;
        let mime_type = mime_guess::from_path(&path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string();

        Ok(RawContent {
            content,
            mime_type,
            charset: None,
            source_url: url.to_string(),
        })
    }
}
