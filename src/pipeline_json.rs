//! Pipeline for JSON documents (OpenAPI specs, package manifests).
//!
//! The payload is validated and re-serialized in stable pretty form so the
//! splitter can divide it along object boundaries. JSON has no links to
//! harvest.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ProcessedContent, RawContent};
use crate::pipelines::ContentPipeline;

pub struct JsonPipeline;

#[async_trait]
impl ContentPipeline for JsonPipeline {
    fn can_process(&self, raw: &RawContent) -> bool {
        raw.mime_type == "application/json" || raw.mime_type.ends_with("+json")
    }

    async fn process(&self, raw: &RawContent) -> Result<ProcessedContent> {
        let text = raw.text();
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => {
                let title = value
                    .get("title")
                    .or_else(|| value.get("name"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let content = serde_json::to_string_pretty(&value).unwrap_or(text);
                Ok(ProcessedContent {
                    content,
                    title,
                    links: Vec::new(),
                    errors: Vec::new(),
                })
            }
            Err(e) => Ok(ProcessedContent {
                // Keep the raw text; note the parse problem for the log.
                content: text,
                title: None,
                links: Vec::new(),
                errors: vec![format!("invalid JSON: {e}")],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(body: &str) -> RawContent {
        RawContent {
            content: body.as_bytes().to_vec(),
            mime_type: "application/json".to_string(),
            charset: None,
            source_url: "https://a.com/openapi.json".to_string(),
        }
    }

    #[tokio::test]
    async fn valid_json_is_prettified_and_titled() {
        let processed = JsonPipeline
            .process(&raw(r#"{"title":"Pet Store","paths":{}}"#))
            .await
            .unwrap();
        assert_eq!(processed.title.as_deref(), Some("Pet Store"));
        assert!(processed.content.contains("\"paths\""));
        assert!(processed.errors.is_empty());
    }

    #[tokio::test]
    async fn invalid_json_is_kept_with_an_error_note() {
        let processed = JsonPipeline.process(&raw("{nope")).await.unwrap();
        assert_eq!(processed.content, "{nope");
        assert_eq!(processed.errors.len(), 1);
    }
}
