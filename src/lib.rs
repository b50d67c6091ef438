//! # docdex
//!
//! **Per-library, per-version documentation indexing with hybrid
//! keyword + vector retrieval.**
//!
//! docdex crawls documentation sites (and local file trees) into a
//! searchable corpus keyed by library and version, then answers queries
//! with hybrid retrieval (BM25 full-text and embedding distance fused by
//! Reciprocal Rank Fusion) and expands every hit into a coherent passage
//! using the chunks' heading hierarchy.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌───────────┐
//! │  Strategies  │──▶│   Worker     │──▶│  SQLite    │
//! │ web/gh/local │   │ Split+Embed │   │ FTS5+Vec  │
//! └──────┬───────┘   └─────────────┘   └────┬──────┘
//!        │                                  │
//!   ┌────┴─────┐                      ┌─────┴─────┐
//!   │ Pipeline │                      │ Retriever │
//!   │ Manager  │                      │  (RRF)    │
//!   └──────────┘                      └───────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. A scrape job is queued with the [`manager::PipelineManager`], which
//!    deduplicates per `(library, version)` and bounds concurrency.
//! 2. The [`worker`] picks the matching [`scraper::ScraperStrategy`]; the
//!    strategy crawls breadth-first through the [`fetcher`]s and converts
//!    pages to Markdown via the [`pipelines`].
//! 3. Each page is divided by the [`splitter`] into heading-addressed
//!    chunks, embedded ([`embedding`]), and persisted by the
//!    [`store::DocumentStore`] with both FTS5 and vector rows.
//! 4. Queries run through [`search`] (RRF hybrid ranking) and the
//!    [`retriever`] (parent/sibling/child context expansion).
//! 5. Everything is reachable from the `docdex` CLI and the HTTP API
//!    ([`server`]).
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`cancel`] | Cooperative cancellation token |
//! | [`config`] | TOML configuration |
//! | [`db`] / [`migrate`] | SQLite pool and ordered schema migrations |
//! | [`embedding`] | Embedding providers (`provider:model`) and vector codecs |
//! | [`error`] | Typed error enum shared across the crate |
//! | [`fetcher`]* | HTTP, `file://`, and GitHub-markdown fetchers |
//! | [`manager`] | Job queue, dedup, scheduling, cancellation |
//! | [`models`] | Chunks, metadata, results |
//! | [`pipelines`]* | MIME-dispatched content → Markdown conversion |
//! | [`retriever`] | Hierarchical context expansion |
//! | [`scraper`]* | Crawl strategies and the shared BFS engine |
//! | [`search`] | Hybrid RRF search and the search service |
//! | [`server`] | Axum HTTP API |
//! | [`splitter`] | Heading-aware Markdown/JSON splitter |
//! | [`store`] | Document store over SQLite |
//! | [`urls`] | Normalization and scope checks |
//! | [`version`] | Semver coercion and best-version resolution |
//! | [`worker`] | Single-job execution |

pub mod cancel;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod fetcher;
pub mod fetcher_file;
pub mod fetcher_github;
pub mod fetcher_http;
pub mod manager;
pub mod migrate;
pub mod models;
pub mod pipeline_html;
pub mod pipeline_json;
pub mod pipeline_markdown;
pub mod pipeline_text;
pub mod pipelines;
pub mod retriever;
pub mod scraper;
pub mod scraper_github;
pub mod scraper_local;
pub mod scraper_registry_sites;
pub mod scraper_web;
pub mod search;
pub mod server;
pub mod splitter;
pub mod store;
pub mod urls;
pub mod version;
pub mod worker;
