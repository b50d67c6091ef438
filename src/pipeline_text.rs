//! Fallback pipeline for any remaining `text/*` content.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ProcessedContent, RawContent};
use crate::pipelines::ContentPipeline;

pub struct TextPipeline;

#[async_trait]
impl ContentPipeline for TextPipeline {
    fn can_process(&self, raw: &RawContent) -> bool {
        raw.mime_type.starts_with("text/")
    }

    async fn process(&self, raw: &RawContent) -> Result<ProcessedContent> {
        Ok(ProcessedContent {
            content: raw.text(),
            title: None,
            links: Vec::new(),
            errors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_text_through() {
        let raw = RawContent {
            content: b"plain notes\nwith lines".to_vec(),
            mime_type: "text/plain".to_string(),
            charset: None,
            source_url: "https://a.com/notes.txt".to_string(),
        };
        let processed = TextPipeline.process(&raw).await.unwrap();
        assert_eq!(processed.content, "plain notes\nwith lines");
        assert!(processed.links.is_empty());
    }
}
