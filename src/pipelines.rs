//! Content pipelines: MIME-dispatched conversion of raw bytes to Markdown.
//!
//! A pipeline declares which content it accepts via `can_process`;
//! dispatch is first-match over the standard set (HTML, Markdown, JSON,
//! plain text). Content no pipeline accepts (binaries, images) is
//! skipped by the caller with a warning.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ProcessedContent, RawContent};

#[async_trait]
pub trait ContentPipeline: Send + Sync {
    /// Whether this pipeline accepts the content's MIME type.
    fn can_process(&self, raw: &RawContent) -> bool;

    /// Convert raw content into Markdown plus discovered links.
    async fn process(&self, raw: &RawContent) -> Result<ProcessedContent>;
}

/// The standard pipeline set, in dispatch order. The plain-text pipeline
/// accepts any remaining `text/*` so it must come last.
pub fn standard_pipelines() -> Vec<Box<dyn ContentPipeline>> {
    vec![
        Box::new(crate::pipeline_html::HtmlPipeline::new()),
        Box::new(crate::pipeline_markdown::MarkdownPipeline),
        Box::new(crate::pipeline_json::JsonPipeline),
        Box::new(crate::pipeline_text::TextPipeline),
    ]
}

/// First pipeline accepting the content, if any.
pub fn select_pipeline<'a>(
    pipelines: &'a [Box<dyn ContentPipeline>],
    raw: &RawContent,
) -> Option<&'a dyn ContentPipeline> {
    pipelines
        .iter()
        .find(|p| p.can_process(raw))
        .map(|p| p.as_ref())
}
