//! Context-expanding retriever.
//!
//! A raw hybrid-search hit is a single chunk, often mid-section. The
//! retriever widens each hit into a coherent passage using the page
//! hierarchy: the hit itself, its parent, up to two siblings on each side,
//! and up to five children. Hits on the same page are merged so a passage
//! is emitted once per URL, deduplicated by chunk id.

use std::collections::HashMap;
use tracing::debug;

use crate::error::Result;
use crate::models::{SearchResult, StoredChunk};
use crate::store::DocumentStore;

const PRECEDING_SIBLINGS: usize = 2;
const SUBSEQUENT_SIBLINGS: usize = 2;
const CHILD_LIMIT: usize = 5;

pub struct Retriever<'a> {
    store: &'a DocumentStore,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a DocumentStore) -> Self {
        Self { store }
    }

    /// Search and expand: one [`SearchResult`] per URL that contributed a
    /// hit, carrying the maximum fused score among its hits. Results are
    /// in no particular order; callers sort by score as needed.
    pub async fn search(
        &self,
        library: &str,
        version: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let hits = self
            .store
            .find_by_content(library, version, query, limit)
            .await?;
        debug!(library, version, hits = hits.len(), "expanding search hits");

        // URL -> (related chunk ids, best score across contributing hits)
        let mut groups: HashMap<String, (Vec<i64>, f64)> = HashMap::new();
        for hit in &hits {
            let related = self.related_ids(&hit.chunk).await?;
            let entry = groups
                .entry(hit.chunk.url.clone())
                .or_insert_with(|| (Vec::new(), hit.score));
            for id in related {
                if !entry.0.contains(&id) {
                    entry.0.push(id);
                }
            }
            if hit.score > entry.1 {
                entry.1 = hit.score;
            }
        }

        let mut results = Vec::with_capacity(groups.len());
        for (url, (ids, score)) in groups {
            let chunks = self
                .store
                .find_chunks_by_ids(library, version, &ids)
                .await?;
            let content = chunks
                .iter()
                .map(|c| c.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            results.push(SearchResult {
                url,
                content,
                score,
            });
        }
        Ok(results)
    }

    /// The hit plus its parent, nearby siblings, and leading children.
    async fn related_ids(&self, chunk: &StoredChunk) -> Result<Vec<i64>> {
        let mut ids = vec![chunk.id];
        if let Some(parent) = self.store.find_parent(chunk).await? {
            ids.push(parent.id);
        }
        for sibling in self
            .store
            .find_preceding_siblings(chunk, PRECEDING_SIBLINGS)
            .await?
        {
            ids.push(sibling.id);
        }
        for sibling in self
            .store
            .find_subsequent_siblings(chunk, SUBSEQUENT_SIBLINGS)
            .await?
        {
            ids.push(sibling.id);
        }
        for child in self.store.find_children(chunk, CHILD_LIMIT).await? {
            ids.push(child.id);
        }
        Ok(ids)
    }
}
