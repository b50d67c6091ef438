//! Hybrid search: BM25 full-text and vector branches fused with
//! Reciprocal Rank Fusion.
//!
//! # Algorithm
//!
//! 1. Embed the query and pad it to the store width.
//! 2. Escape the query into a single FTS5 phrase (operators neutralized).
//! 3. Run both branches constrained to `(library, version)` with top-k:
//!    - vector: ascending L2 distance over the padded embeddings;
//!    - full-text: ascending BM25 with column weights
//!      title 10, url 1, path 5, content 1.
//! 4. Fuse: `rrf(id) = Σ 1/(60 + rank)` over the branches the id appears
//!    in, ranks 1-based per branch.
//! 5. Union, sort by descending `rrf` (id ascending on ties), keep `k`.

use sqlx::Row;
use std::collections::HashMap;
use tracing::debug;

use crate::embedding::{blob_to_vec, l2_distance_sq, pad_vector, EMBEDDING_DIM};
use crate::error::{DocdexError, Result};
use crate::models::{RankedChunk, SearchResult};
use crate::retriever::Retriever;
use crate::store::DocumentStore;

/// Search request options as accepted by the CLI and HTTP API.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    pub library: String,
    #[serde(default)]
    pub version: Option<String>,
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// When false, `version` is resolved through best-version matching;
    /// when true, the literal version partition is searched.
    #[serde(default)]
    pub exact_match: bool,
}

fn default_limit() -> usize {
    5
}

/// Full search flow: resolve the version (unless `exact_match`), run the
/// hybrid search, and expand hits into merged passages, best first.
pub async fn search_library(
    store: &DocumentStore,
    options: &SearchOptions,
) -> Result<Vec<SearchResult>> {
    let version = if options.exact_match {
        options.version.clone().unwrap_or_default().to_lowercase()
    } else {
        store
            .find_best_version(&options.library, options.version.as_deref())
            .await?
    };

    let mut results = Retriever::new(store)
        .search(&options.library, &version, &options.query, options.limit)
        .await?;
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.url.cmp(&b.url))
    });
    Ok(results)
}

/// RRF rank constant; dampens the head of each ranked list.
const RRF_K: f64 = 60.0;

/// Escape arbitrary user text into a single FTS5 phrase.
///
/// Wrapping in double quotes (with interior quotes doubled) turns every
/// FTS5 operator (`AND`, `OR`, `NOT`, `*`, parentheses) into literal
/// phrase text, so no query can raise a syntax error from the FTS layer.
pub fn escape_fts_query(query: &str) -> String {
    format!("\"{}\"", query.replace('"', "\"\""))
}

impl DocumentStore {
    /// Hybrid top-`k` search within `(library, version)`.
    ///
    /// Returns chunks decorated with the fused score and the per-branch
    /// ranks. `k` must be strictly positive.
    pub async fn find_by_content(
        &self,
        library: &str,
        version: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RankedChunk>> {
        if k == 0 {
            return Err(DocdexError::Other(
                "search limit must be strictly positive".to_string(),
            ));
        }
        let library = library.to_lowercase();
        let version = version.to_lowercase();
        let Some(library_id) = self.library_id(&library).await? else {
            return Ok(Vec::new());
        };

        let query_vec = pad_vector(self.embedder().embed_query(query).await?, EMBEDDING_DIM)?;
        let vec_ids = self.vector_branch(library_id, &version, &query_vec, k).await?;
        let fts_ids = self.fts_branch(library_id, &version, query, k).await?;

        let vec_ranks: HashMap<i64, usize> = vec_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i + 1))
            .collect();
        let fts_ranks: HashMap<i64, usize> = fts_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i + 1))
            .collect();

        let mut fused: Vec<(i64, f64)> = vec_ids
            .iter()
            .chain(fts_ids.iter())
            .map(|id| {
                let mut score = 0.0;
                if let Some(rank) = vec_ranks.get(id) {
                    score += 1.0 / (RRF_K + *rank as f64);
                }
                if let Some(rank) = fts_ranks.get(id) {
                    score += 1.0 / (RRF_K + *rank as f64);
                }
                (*id, score)
            })
            .collect();
        fused.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        fused.dedup_by_key(|(id, _)| *id);
        fused.truncate(k);

        let ids: Vec<i64> = fused.iter().map(|(id, _)| *id).collect();
        let chunks = self.find_chunks_by_ids(&library, &version, &ids).await?;
        let by_id: HashMap<i64, _> = chunks.into_iter().map(|c| (c.id, c)).collect();

        Ok(fused
            .into_iter()
            .filter_map(|(id, score)| {
                by_id.get(&id).map(|chunk| RankedChunk {
                    chunk: chunk.clone(),
                    score,
                    vec_rank: vec_ranks.get(&id).copied(),
                    fts_rank: fts_ranks.get(&id).copied(),
                })
            })
            .collect())
    }

    /// Top-`k` document ids by ascending L2 distance to the query vector.
    async fn vector_branch(
        &self,
        library_id: i64,
        version: &str,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT document_id, embedding FROM documents_vec
             WHERE library_id = ? AND version = ?",
        )
        .bind(library_id)
        .bind(version)
        .fetch_all(self.pool())
        .await?;

        let mut scored: Vec<(i64, f64)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let distance = l2_distance_sq(query_vec, &blob_to_vec(&blob));
                (row.get::<i64, _>("document_id"), distance)
            })
            .collect();
        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored.into_iter().map(|(id, _)| id).collect())
    }

    /// Top-`k` document ids by ascending BM25 over the weighted FTS index.
    ///
    /// A phrase that tokenizes to nothing (an empty query, or one made of
    /// pure punctuation) matches no rows; if the FTS parser still objects,
    /// the branch contributes nothing rather than failing the search.
    async fn fts_branch(
        &self,
        library_id: i64,
        version: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<i64>> {
        let result = sqlx::query(
            "SELECT f.rowid AS id
             FROM documents_fts f
             JOIN documents d ON d.id = f.rowid
             WHERE documents_fts MATCH ?
               AND d.library_id = ? AND d.version = ?
             ORDER BY bm25(documents_fts, 10.0, 1.0, 5.0, 1.0)
             LIMIT ?",
        )
        .bind(escape_fts_query(query))
        .bind(library_id)
        .bind(version)
        .bind(k as i64)
        .fetch_all(self.pool())
        .await;
        match result {
            Ok(rows) => Ok(rows.iter().map(|row| row.get("id")).collect()),
            Err(sqlx::Error::Database(db)) if db.message().contains("fts5") => {
                debug!(query, error = %db.message(), "FTS query rejected, skipping branch");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}
