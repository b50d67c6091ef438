//! End-to-end tests for the document store: insertion, hybrid search,
//! hierarchical lookups, listings, and retrieval expansion, against a real
//! SQLite file with a deterministic stub embedder.

use async_trait::async_trait;
use std::sync::Arc;
use tempfile::TempDir;

use docdex::embedding::EmbeddingProvider;
use docdex::error::{DocdexError, Result};
use docdex::models::{ChunkMetadata, DocumentInput, StoredChunk};
use docdex::retriever::Retriever;
use docdex::store::DocumentStore;

/// Deterministic bag-of-words embedder: each word hashes into a bucket,
/// the vector is L2-normalized. Texts sharing words land close together.
struct StubEmbedder {
    dims: usize,
}

impl StubEmbedder {
    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in text.split(|c: char| !c.is_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            let mut hash: u64 = 1469598103934665603;
            for b in word.to_lowercase().bytes() {
                hash ^= b as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            v[(hash % self.dims as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    fn model_name(&self) -> &str {
        "stub"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

async fn open_store() -> (TempDir, DocumentStore) {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::open(
        &dir.path().join("docdex.sqlite"),
        Arc::new(StubEmbedder { dims: 64 }),
    )
    .await
    .unwrap();
    (dir, store)
}

fn doc(content: &str, url: &str, path: &[&str], level: usize) -> DocumentInput {
    DocumentInput {
        content: content.to_string(),
        metadata: ChunkMetadata {
            title: Some("Test Page".to_string()),
            url: url.to_string(),
            path: path.iter().map(|s| s.to_string()).collect(),
            level: Some(level),
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn add_then_search_returns_scored_chunks() {
    let (_dir, store) = open_store().await;
    store
        .add_documents(
            "MyLib",
            "1.0.0",
            &[
                doc("rust ownership and borrowing rules", "https://a.com/docs", &["Guide"], 1),
                doc("cooking pasta with tomato sauce", "https://a.com/docs", &["Guide"], 1),
                doc("rust lifetimes and ownership deep dive", "https://a.com/docs", &["Guide"], 1),
            ],
        )
        .await
        .unwrap();

    let hits = store
        .find_by_content("mylib", "1.0.0", "rust ownership", 2)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.len() <= 2);
    for hit in &hits {
        assert!(hit.score > 0.0);
        assert!(hit.vec_rank.is_some() || hit.fts_rank.is_some());
    }
    assert!(hits[0].chunk.content.contains("ownership"));
}

#[tokio::test]
async fn library_and_version_are_lowercased_on_insert() {
    let (_dir, store) = open_store().await;
    store
        .add_documents(
            "MyLib",
            "1.0.0-RC1",
            &[doc("text", "https://a.com/p", &[], 0)],
        )
        .await
        .unwrap();
    let hits = store
        .find_by_content("mylib", "1.0.0-rc1", "text", 5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.library, "mylib");
    assert_eq!(hits[0].chunk.version, "1.0.0-rc1");
}

#[tokio::test]
async fn fts_operators_and_quotes_never_error() {
    let (_dir, store) = open_store().await;
    store
        .add_documents(
            "lib",
            "",
            &[doc("you can find \"quotes\" in here", "https://a.com/p", &[], 0)],
        )
        .await
        .unwrap();

    for query in [
        "find \"quotes\"",
        "a AND b OR c NOT d",
        "wild*card (parens)",
        "",
        "\"\"\"",
    ] {
        let result = store.find_by_content("lib", "", query, 5).await;
        assert!(result.is_ok(), "query {query:?} errored: {result:?}");
    }

    // The quoted phrase matches literally.
    let hits = store
        .find_by_content("lib", "", "find \"quotes\"", 5)
        .await
        .unwrap();
    assert!(hits.iter().any(|h| h.fts_rank.is_some()));
}

#[tokio::test]
async fn zero_limit_is_rejected() {
    let (_dir, store) = open_store().await;
    assert!(store.find_by_content("lib", "", "q", 0).await.is_err());
}

#[tokio::test]
async fn missing_url_aborts_the_insert() {
    let (_dir, store) = open_store().await;
    let result = store
        .add_documents("lib", "", &[doc("content", "  ", &[], 0)])
        .await;
    assert!(matches!(result, Err(DocdexError::EmptyUrl)));
    // Nothing was written.
    let hits = store.find_by_content("lib", "", "content", 5).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn oversized_embedder_fails_at_open() {
    let dir = TempDir::new().unwrap();
    let result = DocumentStore::open(
        &dir.path().join("docdex.sqlite"),
        Arc::new(StubEmbedder { dims: 4096 }),
    )
    .await;
    assert!(matches!(result, Err(DocdexError::Dimension { .. })));
}

#[tokio::test]
async fn delete_documents_removes_everything() {
    let (_dir, store) = open_store().await;
    store
        .add_documents(
            "lib",
            "2.0.0",
            &[
                doc("first chunk", "https://a.com/p", &[], 0),
                doc("second chunk", "https://a.com/p", &[], 0),
            ],
        )
        .await
        .unwrap();

    let removed = store.delete_documents("LIB", "2.0.0").await.unwrap();
    assert_eq!(removed, 2);

    let hits = store
        .find_by_content("lib", "2.0.0", "chunk", 5)
        .await
        .unwrap();
    assert!(hits.is_empty(), "search after delete must be empty");

    // Deleting again is a no-op.
    assert_eq!(store.delete_documents("lib", "2.0.0").await.unwrap(), 0);
}

async fn page_chunk(store: &DocumentStore, sort_order: i64) -> StoredChunk {
    let ids: Vec<i64> = (1..=10).collect();
    store
        .find_chunks_by_ids("lib", "", &ids)
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.sort_order == sort_order)
        .unwrap()
}

/// Page layout used by the hierarchy tests:
///
/// ```text
/// 0  []        intro
/// 1  [A]       section A
/// 2  [A, B]    subsection B (first part)
/// 3  [A, B]    subsection B (second part)
/// 4  [A, C]    subsection C
/// 5  [D]       section D
/// ```
async fn hierarchy_store() -> (TempDir, DocumentStore) {
    let (dir, store) = open_store().await;
    let url = "https://a.com/page";
    store
        .add_documents(
            "lib",
            "",
            &[
                doc("intro", url, &[], 0),
                doc("section a", url, &["A"], 1),
                doc("sub b one", url, &["A", "B"], 2),
                doc("sub b two", url, &["A", "B"], 2),
                doc("sub c", url, &["A", "C"], 2),
                doc("section d", url, &["D"], 1),
            ],
        )
        .await
        .unwrap();
    (dir, store)
}

#[tokio::test]
async fn parent_is_the_closest_preceding_prefix() {
    let (_dir, store) = hierarchy_store().await;
    let b_two = page_chunk(&store, 3).await;
    let parent = store.find_parent(&b_two).await.unwrap().unwrap();
    assert_eq!(parent.sort_order, 1);
    assert_eq!(parent.metadata.path, vec!["A"]);

    let section_a = page_chunk(&store, 1).await;
    let root = store.find_parent(&section_a).await.unwrap().unwrap();
    assert_eq!(root.sort_order, 0);

    let intro = page_chunk(&store, 0).await;
    assert!(store.find_parent(&intro).await.unwrap().is_none());
}

#[tokio::test]
async fn siblings_share_the_exact_path() {
    let (_dir, store) = hierarchy_store().await;
    let b_two = page_chunk(&store, 3).await;

    let preceding = store.find_preceding_siblings(&b_two, 2).await.unwrap();
    assert_eq!(
        preceding.iter().map(|c| c.sort_order).collect::<Vec<_>>(),
        vec![2]
    );

    let b_one = page_chunk(&store, 2).await;
    let subsequent = store.find_subsequent_siblings(&b_one, 2).await.unwrap();
    assert_eq!(
        subsequent.iter().map(|c| c.sort_order).collect::<Vec<_>>(),
        vec![3]
    );

    // [A, C] has a different path and is no sibling of [A, B].
    assert!(store
        .find_subsequent_siblings(&b_two, 5)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn children_are_prefix_matches_one_level_down() {
    let (_dir, store) = hierarchy_store().await;
    let section_a = page_chunk(&store, 1).await;
    let children = store.find_children(&section_a, 5).await.unwrap();
    assert_eq!(
        children.iter().map(|c| c.sort_order).collect::<Vec<_>>(),
        vec![2, 3, 4]
    );

    let section_d = page_chunk(&store, 5).await;
    assert!(store.find_children(&section_d, 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn chunks_by_ids_come_back_in_sort_order() {
    let (_dir, store) = hierarchy_store().await;
    let all: Vec<i64> = (1..=10).collect();
    let chunks = store.find_chunks_by_ids("lib", "", &all).await.unwrap();
    let orders: Vec<i64> = chunks.iter().map(|c| c.sort_order).collect();
    let mut sorted = orders.clone();
    sorted.sort();
    assert_eq!(orders, sorted);
    assert_eq!(chunks.len(), 6);
}

#[tokio::test]
async fn readding_creates_fresh_rows_with_the_same_hierarchy() {
    let (_dir, store) = hierarchy_store().await;
    let before = store
        .find_chunks_by_ids("lib", "", &(1..=20).collect::<Vec<_>>())
        .await
        .unwrap();
    let url = "https://a.com/page";
    store
        .add_documents("lib", "", &[doc("intro", url, &[], 0)])
        .await
        .unwrap();
    let after = store
        .find_chunks_by_ids("lib", "", &(1..=20).collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(after.len(), before.len() + 1);
    // Old chunks remain addressable with their original ids.
    for chunk in &before {
        assert!(after.iter().any(|c| c.id == chunk.id));
    }
}

#[tokio::test]
async fn library_listing_groups_and_orders_versions() {
    let (_dir, store) = open_store().await;
    store
        .add_documents("lib", "2.0.0", &[doc("x", "https://a.com/1", &[], 0)])
        .await
        .unwrap();
    store
        .add_documents(
            "lib",
            "",
            &[
                doc("y", "https://a.com/1", &[], 0),
                doc("z", "https://a.com/2", &[], 0),
            ],
        )
        .await
        .unwrap();
    store
        .add_documents("lib", "1.10.0", &[doc("w", "https://a.com/3", &[], 0)])
        .await
        .unwrap();

    let map = store.query_library_versions().await.unwrap();
    let versions = &map["lib"];
    let order: Vec<&str> = versions.iter().map(|v| v.version.as_str()).collect();
    assert_eq!(order, vec!["", "1.10.0", "2.0.0"]);

    let unversioned = &versions[0];
    assert_eq!(unversioned.document_count, 2);
    assert_eq!(unversioned.unique_url_count, 2);
    assert!(unversioned.indexed_at.is_some());
}

#[tokio::test]
async fn best_version_resolution_through_the_store() {
    let (_dir, store) = open_store().await;
    for version in ["1.0.0", "1.1.0", "1.1.1"] {
        store
            .add_documents("lib", version, &[doc("x", "https://a.com/1", &[], 0)])
            .await
            .unwrap();
    }

    assert_eq!(store.find_best_version("lib", None).await.unwrap(), "1.1.1");
    assert_eq!(
        store.find_best_version("lib", Some("2.0.0")).await.unwrap(),
        "1.1.1"
    );
    assert_eq!(
        store.find_best_version("lib", Some("1.x")).await.unwrap(),
        "1.1.1"
    );
    assert!(matches!(
        store.find_best_version("lib", Some("1.x.2")).await,
        Err(DocdexError::InvalidVersion(_))
    ));
}

#[tokio::test]
async fn unversioned_only_library_falls_back_for_latest() {
    let (_dir, store) = open_store().await;
    store
        .add_documents("lib", "", &[doc("x", "https://a.com/1", &[], 0)])
        .await
        .unwrap();
    assert_eq!(store.find_best_version("lib", None).await.unwrap(), "");
    assert!(matches!(
        store.find_best_version("lib", Some("1.0.0")).await,
        Err(DocdexError::VersionNotFound { .. })
    ));
}

#[tokio::test]
async fn retrieval_expands_hits_into_one_ordered_passage_per_url() {
    let (_dir, store) = open_store().await;
    let url = "https://a.com/page";
    store
        .add_documents(
            "lib",
            "",
            &[
                doc("rust ownership borrowing explained", url, &["S"], 1),
                doc("a quiet interlude about nothing", url, &["S"], 1),
                doc("rust ownership lifetimes explained", url, &["S"], 1),
            ],
        )
        .await
        .unwrap();

    let hits = store
        .find_by_content("lib", "", "rust ownership explained", 2)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    let max_score = hits.iter().map(|h| h.score).fold(0.0f64, f64::max);

    let results = Retriever::new(&store)
        .search("lib", "", "rust ownership explained", 2)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.url, url);
    assert_eq!(
        result.content,
        "rust ownership borrowing explained\n\na quiet interlude about nothing\n\nrust ownership lifetimes explained"
    );
    assert!((result.score - max_score).abs() < 1e-12);
}
