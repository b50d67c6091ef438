//! Pipeline worker: executes one scrape job to completion.
//!
//! The worker picks the strategy, runs it on its own task, and consumes
//! the progress stream: each page-level document is split into chunks and
//! stored, counters are updated, and the manager's progress hook is
//! invoked. Store failures are reported but do not abort the crawl unless
//! the job runs with `ignore_errors = false`.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::error::{DocdexError, Result};
use crate::models::{ChunkMetadata, DocumentInput};
use crate::scraper::{PageDocument, ScrapeOptions, StrategyRegistry};
use crate::splitter::SemanticSplitter;
use crate::store::DocumentStore;

/// Counters exposed on a job while it runs and after it finishes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobProgress {
    pub pages_scraped: usize,
    pub max_pages: usize,
    pub current_url: Option<String>,
    pub depth: usize,
    pub max_depth: usize,
    pub chunks_indexed: usize,
}

pub type ProgressHook = Arc<dyn Fn(&JobProgress) + Send + Sync>;

const PROGRESS_CHANNEL_CAPACITY: usize = 32;

/// Run one job: scrape, split, store. Returns the final counters.
pub async fn run_job(
    options: &ScrapeOptions,
    store: &DocumentStore,
    registry: &StrategyRegistry,
    signal: CancellationToken,
    on_progress: Option<ProgressHook>,
) -> Result<JobProgress> {
    let strategy = registry
        .find(&options.url)
        .ok_or_else(|| DocdexError::NoStrategy(options.url.clone()))?;

    let (tx, mut rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
    let scrape_options = options.clone();
    let scrape_signal = signal.clone();
    let scrape = tokio::spawn(async move {
        strategy
            .scrape(&scrape_options, tx, scrape_signal)
            .await
    });

    let splitter = SemanticSplitter::default();
    let mut progress = JobProgress {
        max_pages: options.max_pages,
        max_depth: options.max_depth,
        ..JobProgress::default()
    };

    let mut fatal: Option<DocdexError> = None;
    while let Some(event) = rx.recv().await {
        progress.pages_scraped = event.pages_scraped;
        progress.current_url = Some(event.current_url.clone());
        progress.depth = event.depth;
        progress.max_depth = event.max_depth;

        if let Some(document) = event.document {
            match store_document(store, options, &splitter, &document).await {
                Ok(count) => progress.chunks_indexed += count,
                Err(e) if options.ignore_errors => {
                    warn!(url = %document.url, error = %e, "storing page failed, continuing");
                }
                Err(e) => {
                    // Stop the crawl and surface the failure.
                    signal.cancel();
                    fatal = Some(e);
                    break;
                }
            }
        }
        if let Some(hook) = &on_progress {
            hook(&progress);
        }
    }
    // Dropping the receiver unblocks a strategy waiting to send, so the
    // scrape task always winds down.
    drop(rx);

    let scrape_result = match scrape.await {
        Ok(result) => result,
        Err(e) => Err(DocdexError::Other(format!("scrape task panicked: {e}"))),
    };
    if let Some(e) = fatal {
        return Err(e);
    }
    scrape_result?;

    info!(
        library = %options.library,
        version = %options.version,
        pages = progress.pages_scraped,
        chunks = progress.chunks_indexed,
        "job finished"
    );
    Ok(progress)
}

async fn store_document(
    store: &DocumentStore,
    options: &ScrapeOptions,
    splitter: &SemanticSplitter,
    document: &PageDocument,
) -> Result<usize> {
    let chunks = splitter.split(&document.content);
    if chunks.is_empty() {
        return Ok(0);
    }
    let inputs: Vec<DocumentInput> = chunks
        .into_iter()
        .map(|chunk| DocumentInput {
            content: chunk.content,
            metadata: ChunkMetadata {
                title: Some(document.title.clone()),
                url: document.url.clone(),
                path: chunk.section.path,
                level: Some(chunk.section.level),
                ..Default::default()
            },
        })
        .collect();
    store
        .add_documents(&options.library, &options.version, &inputs)
        .await
}
