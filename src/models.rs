//! Core data models flowing through the scrape, store, and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured metadata carried by every stored chunk.
///
/// `path` is the ordered heading trail from the page root to the chunk's
/// section; together with `sort_order` it encodes the page hierarchy
/// (no explicit parent pointers are stored).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub url: String,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<usize>,
    /// Extra processor-supplied fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A chunk handed to the store for insertion.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// A chunk as persisted: content plus metadata plus its addressing fields.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: i64,
    pub library: String,
    pub version: String,
    pub url: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub sort_order: i64,
    pub indexed_at: DateTime<Utc>,
}

/// A hybrid-search hit: a stored chunk decorated with its fused score and
/// the per-branch ranks that produced it.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk: StoredChunk,
    /// Reciprocal Rank Fusion score (always > 0 for a returned hit).
    pub score: f64,
    /// 1-based rank in the vector branch, when the chunk appeared there.
    pub vec_rank: Option<usize>,
    /// 1-based rank in the full-text branch, when the chunk appeared there.
    pub fts_rank: Option<usize>,
}

/// One merged, ordered passage emitted by the retriever.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub url: String,
    pub content: String,
    pub score: f64,
}

/// Per-version aggregate returned by the library listing.
#[derive(Debug, Clone, Serialize)]
pub struct VersionDetails {
    pub version: String,
    pub document_count: i64,
    pub unique_url_count: i64,
    pub indexed_at: Option<DateTime<Utc>>,
}

/// A chunk produced by the splitter: content plus its section coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentChunk {
    pub content: String,
    pub section: SectionInfo,
}

/// Heading coordinates of a [`ContentChunk`].
#[derive(Debug, Clone, PartialEq)]
pub struct SectionInfo {
    /// Heading depth (0 for preamble content before any heading).
    pub level: usize,
    /// Heading trail from the page root to this section.
    pub path: Vec<String>,
}

/// Raw bytes retrieved by a fetcher, before any processing.
#[derive(Debug, Clone)]
pub struct RawContent {
    pub content: Vec<u8>,
    pub mime_type: String,
    pub charset: Option<String>,
    pub source_url: String,
}

impl RawContent {
    /// Best-effort UTF-8 view of the payload.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    /// True when the MIME type denotes text-bearing content any pipeline
    /// could plausibly accept.
    pub fn is_text(&self) -> bool {
        self.mime_type.starts_with("text/")
            || matches!(
                self.mime_type.as_str(),
                "application/json" | "application/xhtml+xml"
            )
    }
}

/// Output of a content pipeline: Markdown plus discovered links.
#[derive(Debug, Clone, Default)]
pub struct ProcessedContent {
    /// Markdown rendition of the page. Blank means the page is skipped.
    pub content: String,
    pub title: Option<String>,
    /// Absolute link targets found in the page, resolved against its URL.
    pub links: Vec<String>,
    /// Non-fatal problems encountered while processing.
    pub errors: Vec<String>,
}
