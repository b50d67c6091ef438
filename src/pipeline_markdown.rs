//! Pipeline for content that is already Markdown.
//!
//! The text passes through untouched; links are harvested from inline
//! `[text](target)` syntax and resolved against the source URL, and the
//! title is taken from the first top-level heading.

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

use crate::error::Result;
use crate::models::{ProcessedContent, RawContent};
use crate::pipelines::ContentPipeline;

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[^\]]*\]\(([^)\s]+)[^)]*\)").unwrap())
}

pub struct MarkdownPipeline;

#[async_trait]
impl ContentPipeline for MarkdownPipeline {
    fn can_process(&self, raw: &RawContent) -> bool {
        matches!(raw.mime_type.as_str(), "text/markdown" | "text/x-markdown")
    }

    async fn process(&self, raw: &RawContent) -> Result<ProcessedContent> {
        let content = raw.text();
        let base = Url::parse(&raw.source_url).ok();

        let title = content.lines().find_map(|line| {
            line.strip_prefix("# ")
                .map(|rest| rest.trim().to_string())
                .filter(|t| !t.is_empty())
        });

        let mut links = Vec::new();
        for capture in link_regex().captures_iter(&content) {
            let target = &capture[1];
            if target.starts_with('#') {
                continue;
            }
            let resolved = match &base {
                Some(base) => match base.join(target) {
                    Ok(url) => url.to_string(),
                    Err(_) => continue,
                },
                None => target.to_string(),
            };
            links.push(resolved);
        }

        Ok(ProcessedContent {
            content,
            title,
            links,
            errors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(body: &str) -> RawContent {
        RawContent {
            content: body.as_bytes().to_vec(),
            mime_type: "text/markdown".to_string(),
            charset: None,
            source_url: "https://a.com/docs/guide".to_string(),
        }
    }

    #[tokio::test]
    async fn passes_content_through_and_finds_title() {
        let body = "# The Guide\n\nSome text with a [link](./install) and an\n[absolute](https://b.com/x) one.";
        let processed = MarkdownPipeline.process(&raw(body)).await.unwrap();
        assert_eq!(processed.content, body);
        assert_eq!(processed.title.as_deref(), Some("The Guide"));
        assert_eq!(
            processed.links,
            vec!["https://a.com/docs/install", "https://b.com/x"]
        );
    }

    #[tokio::test]
    async fn fragment_links_are_ignored() {
        let processed = MarkdownPipeline
            .process(&raw("see [below](#section)"))
            .await
            .unwrap();
        assert!(processed.links.is_empty());
    }
}
