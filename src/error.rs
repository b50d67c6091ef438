//! Typed errors for the indexing and retrieval pipeline.
//!
//! Library code returns [`DocdexError`] so callers can branch on the failure
//! kind (the HTTP API maps variants to response payloads, the CLI prints
//! them). Only the binary crate wraps things in `anyhow`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DocdexError>;

#[derive(Debug, Error)]
pub enum DocdexError {
    /// URL could not be parsed or has an unsupported scheme.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Version string violates the accepted version grammar.
    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    /// Best-version resolution produced an empty satisfying set.
    #[error("no indexed version of '{library}' satisfies '{requested}' (available: {available:?})")]
    VersionNotFound {
        library: String,
        requested: String,
        available: Vec<String>,
    },

    /// Embedding provider produces vectors wider than the store's fixed
    /// dimension. Raised at store construction, before any writes.
    #[error("embedding dimension {actual} exceeds the maximum of {max}")]
    Dimension { actual: usize, max: usize },

    /// A chunk arrived at the store without a usable source URL.
    #[error("document metadata is missing a non-empty URL")]
    EmptyUrl,

    /// HTTP fetch failed with a client status after retries were exhausted.
    #[error("fetch of '{url}' failed with status {status} after {attempts} attempts")]
    FetchStatus {
        url: String,
        status: u16,
        attempts: u32,
    },

    /// Transport-level fetch failure (5xx, DNS, connect, timeout). Not retried.
    #[error("fetch of '{url}' failed: {reason}")]
    FetchTransport { url: String, reason: String },

    /// A scrape was cancelled through its cancellation token.
    #[error("scrape cancelled")]
    Cancelled,

    /// Content processor failed or no pipeline accepts the content type.
    #[error("cannot process content from '{url}': {reason}")]
    Processing { url: String, reason: String },

    /// Schema migration failed at store startup.
    #[error("migration '{id}' failed: {reason}")]
    Migration { id: String, reason: String },

    /// No registered scraper strategy accepts the URL.
    #[error("no scraper strategy can handle '{0}'")]
    NoStrategy(String),

    /// Unknown job id passed to the pipeline manager.
    #[error("unknown job '{0}'")]
    UnknownJob(String),

    /// Embedding provider failure (bad config, exhausted retries).
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl DocdexError {
    /// True when the error came from transient lock contention and the
    /// operation may be retried with a small backoff.
    pub fn is_busy(&self) -> bool {
        match self {
            DocdexError::Database(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some("5")
                    || db.code().as_deref() == Some("517")
                    || db.message().contains("database is locked")
            }
            _ => false,
        }
    }
}
