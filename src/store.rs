//! Document store: persistence of chunks with full-text and vector indexes.
//!
//! Chunks live in three coupled tables: `documents` (content + metadata),
//! `documents_fts` (FTS5, rowid = document id) and `documents_vec`
//! (padded embedding BLOBs, keyed by document id). All writes for one
//! insertion or deletion happen in a single transaction so the three stay
//! consistent.
//!
//! Page hierarchy is not stored as edges. A chunk's parent, siblings, and
//! children are recovered from `(url, metadata.path, sort_order)` with
//! index queries; see the `find_*` lookups.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::db;
use crate::embedding::{pad_vector, vec_to_blob, EmbeddingProvider, EMBEDDING_DIM};
use crate::error::{DocdexError, Result};
use crate::migrate;
use crate::models::{ChunkMetadata, DocumentInput, StoredChunk, VersionDetails};
use crate::version;

/// Number of texts sent to the embedder per batch.
pub const EMBED_BATCH: usize = 512;

pub struct DocumentStore {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl DocumentStore {
    /// Open (or create) the store at `db_path`, run migrations, and verify
    /// the embedder fits the fixed vector width. Fails with a dimension
    /// error before any writes when it does not.
    pub async fn open(db_path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        Self::with_pool(pool, embedder).await
    }

    /// Build a store on an existing pool (used by tests with `:memory:`).
    pub async fn with_pool(pool: SqlitePool, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if embedder.dims() > EMBEDDING_DIM {
            return Err(DocdexError::Dimension {
                actual: embedder.dims(),
                max: EMBEDDING_DIM,
            });
        }
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool, embedder })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ============ Insert ============

    /// Insert a page's chunks for `(library, version)`, in document order.
    ///
    /// Chunks are embedded in batches; the text sent to the embedder is
    /// prefixed with a title/url/path header that is not stored as content.
    /// `sort_order` is the chunk's index in `documents`. Returns the number
    /// of chunks written.
    pub async fn add_documents(
        &self,
        library: &str,
        version: &str,
        documents: &[DocumentInput],
    ) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        let library = library.to_lowercase();
        let version = version.to_lowercase();

        for doc in documents {
            if doc.metadata.url.trim().is_empty() {
                return Err(DocdexError::EmptyUrl);
            }
        }

        let texts: Vec<String> = documents.iter().map(embedding_text).collect();
        let mut blobs = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            let vectors = self.embedder.embed(batch).await?;
            if vectors.len() != batch.len() {
                return Err(DocdexError::Embedding(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            for vector in vectors {
                blobs.push(vec_to_blob(&pad_vector(vector, EMBEDDING_DIM)?));
            }
        }

        let library_id = self.ensure_library(&library).await?;
        let indexed_at = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        for (i, (doc, blob)) in documents.iter().zip(blobs.iter()).enumerate() {
            let metadata_json = serde_json::to_string(&doc.metadata)
                .map_err(|e| DocdexError::Other(format!("metadata serialization: {e}")))?;
            let result = sqlx::query(
                "INSERT INTO documents
                     (library_id, version, url, content, metadata, sort_order, indexed_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(library_id)
            .bind(&version)
            .bind(&doc.metadata.url)
            .bind(&doc.content)
            .bind(&metadata_json)
            .bind(i as i64)
            .bind(&indexed_at)
            .execute(&mut *tx)
            .await?;
            let id = result.last_insert_rowid();

            sqlx::query(
                "INSERT INTO documents_fts (rowid, title, url, path, content)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(doc.metadata.title.as_deref().unwrap_or(""))
            .bind(&doc.metadata.url)
            .bind(doc.metadata.path.join(" / "))
            .bind(&doc.content)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO documents_vec (document_id, library_id, version, embedding)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(id)
            .bind(library_id)
            .bind(&version)
            .bind(blob)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(%library, %version, count = documents.len(), "chunks stored");
        Ok(documents.len())
    }

    // ============ Delete ============

    /// Remove all chunks for `(library, version)` along with their FTS and
    /// vector rows, atomically. Returns the number of chunks removed.
    pub async fn delete_documents(&self, library: &str, version: &str) -> Result<u64> {
        let library = library.to_lowercase();
        let version = version.to_lowercase();
        let Some(library_id) = self.library_id(&library).await? else {
            return Ok(0);
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM documents_fts WHERE rowid IN
                 (SELECT id FROM documents WHERE library_id = ? AND version = ?)",
        )
        .bind(library_id)
        .bind(&version)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM documents_vec WHERE library_id = ? AND version = ?")
            .bind(library_id)
            .bind(&version)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM documents WHERE library_id = ? AND version = ?")
            .bind(library_id)
            .bind(&version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected())
    }

    // ============ Hierarchical lookups ============

    /// The closest chunk on the same page whose path is `chunk.path` minus
    /// its last element and whose `sort_order` precedes the chunk's.
    /// `None` for root chunks (empty path).
    pub async fn find_parent(&self, chunk: &StoredChunk) -> Result<Option<StoredChunk>> {
        if chunk.metadata.path.is_empty() {
            return Ok(None);
        }
        let parent_path = &chunk.metadata.path[..chunk.metadata.path.len() - 1];
        let row = sqlx::query(&format!(
            "{CHUNK_SELECT}
             WHERE l.name = ? AND d.version = ? AND d.url = ?
               AND json_extract(d.metadata, '$.path') = ?
               AND d.sort_order < ?
             ORDER BY d.sort_order DESC
             LIMIT 1"
        ))
        .bind(&chunk.library)
        .bind(&chunk.version)
        .bind(&chunk.url)
        .bind(path_json(parent_path))
        .bind(chunk.sort_order)
        .fetch_optional(&self.pool)
        .await?;
        row.map(chunk_from_row).transpose()
    }

    /// Up to `n` chunks with the same path immediately before `chunk`,
    /// in ascending `sort_order`.
    pub async fn find_preceding_siblings(
        &self,
        chunk: &StoredChunk,
        n: usize,
    ) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(&format!(
            "{CHUNK_SELECT}
             WHERE l.name = ? AND d.version = ? AND d.url = ?
               AND json_extract(d.metadata, '$.path') = ?
               AND d.sort_order < ?
             ORDER BY d.sort_order DESC
             LIMIT ?"
        ))
        .bind(&chunk.library)
        .bind(&chunk.version)
        .bind(&chunk.url)
        .bind(path_json(&chunk.metadata.path))
        .bind(chunk.sort_order)
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut chunks = rows
            .into_iter()
            .map(chunk_from_row)
            .collect::<Result<Vec<_>>>()?;
        chunks.reverse();
        Ok(chunks)
    }

    /// Up to `n` chunks with the same path immediately after `chunk`,
    /// in ascending `sort_order`.
    pub async fn find_subsequent_siblings(
        &self,
        chunk: &StoredChunk,
        n: usize,
    ) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(&format!(
            "{CHUNK_SELECT}
             WHERE l.name = ? AND d.version = ? AND d.url = ?
               AND json_extract(d.metadata, '$.path') = ?
               AND d.sort_order > ?
             ORDER BY d.sort_order ASC
             LIMIT ?"
        ))
        .bind(&chunk.library)
        .bind(&chunk.version)
        .bind(&chunk.url)
        .bind(path_json(&chunk.metadata.path))
        .bind(chunk.sort_order)
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(chunk_from_row).collect()
    }

    /// The first `n` chunks one level below `chunk` (path one element
    /// longer, prefixed by the chunk's path) that follow it on the page.
    pub async fn find_children(&self, chunk: &StoredChunk, n: usize) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(&format!(
            "{CHUNK_SELECT}
             WHERE l.name = ? AND d.version = ? AND d.url = ?
               AND json_array_length(json_extract(d.metadata, '$.path')) = ?
               AND d.sort_order > ?
             ORDER BY d.sort_order ASC"
        ))
        .bind(&chunk.library)
        .bind(&chunk.version)
        .bind(&chunk.url)
        .bind((chunk.metadata.path.len() + 1) as i64)
        .bind(chunk.sort_order)
        .fetch_all(&self.pool)
        .await?;

        let mut children = Vec::with_capacity(n);
        for row in rows {
            let candidate = chunk_from_row(row)?;
            if candidate.metadata.path.starts_with(&chunk.metadata.path) {
                children.push(candidate);
                if children.len() == n {
                    break;
                }
            }
        }
        Ok(children)
    }

    /// Fetch chunks by id within `(library, version)`, ordered by
    /// `sort_order`.
    pub async fn find_chunks_by_ids(
        &self,
        library: &str,
        version: &str,
        ids: &[i64],
    ) -> Result<Vec<StoredChunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "{CHUNK_SELECT}
             WHERE l.name = ? AND d.version = ? AND d.id IN ({placeholders})
             ORDER BY d.sort_order ASC"
        );
        let mut query = sqlx::query(&sql)
            .bind(library.to_lowercase())
            .bind(version.to_lowercase());
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(chunk_from_row).collect()
    }

    // ============ Listings ============

    /// All libraries with their version aggregates. Versions are ordered
    /// unversioned-first, then semver ascending, then the rest.
    pub async fn query_library_versions(&self) -> Result<BTreeMap<String, Vec<VersionDetails>>> {
        let rows = sqlx::query(
            "SELECT l.name AS library, d.version AS version,
                    COUNT(*) AS document_count,
                    COUNT(DISTINCT d.url) AS unique_url_count,
                    MIN(d.indexed_at) AS indexed_at
             FROM documents d
             JOIN libraries l ON l.id = d.library_id
             GROUP BY l.name, d.version",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut map: BTreeMap<String, Vec<VersionDetails>> = BTreeMap::new();
        for row in rows {
            let library: String = row.get("library");
            let indexed_at: Option<String> = row.get("indexed_at");
            map.entry(library).or_default().push(VersionDetails {
                version: row.get("version"),
                document_count: row.get("document_count"),
                unique_url_count: row.get("unique_url_count"),
                indexed_at: indexed_at.and_then(parse_timestamp),
            });
        }
        for details in map.values_mut() {
            let mut order: Vec<String> = details.iter().map(|d| d.version.clone()).collect();
            version::sort_versions(&mut order);
            details.sort_by_key(|d| order.iter().position(|v| *v == d.version).unwrap_or(0));
        }
        Ok(map)
    }

    /// Distinct version strings indexed for `library`.
    pub async fn list_versions(&self, library: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT d.version AS version
             FROM documents d JOIN libraries l ON l.id = d.library_id
             WHERE l.name = ?",
        )
        .bind(library.to_lowercase())
        .fetch_all(&self.pool)
        .await?;
        let mut versions: Vec<String> = rows.iter().map(|row| row.get("version")).collect();
        version::sort_versions(&mut versions);
        Ok(versions)
    }

    /// Resolve the best indexed version for `library` (see
    /// [`version::find_best_version`]). Falls back to the unversioned
    /// partition when no semver versions exist and no explicit target was
    /// requested.
    pub async fn find_best_version(&self, library: &str, target: Option<&str>) -> Result<String> {
        let versions = self.list_versions(library).await?;
        match version::find_best_version(&library.to_lowercase(), &versions, target) {
            Err(DocdexError::VersionNotFound { .. })
                if target.map_or(true, |t| t.is_empty() || t.eq_ignore_ascii_case("latest"))
                    && versions.iter().any(|v| v.is_empty()) =>
            {
                Ok(String::new())
            }
            other => other,
        }
    }

    // ============ Internals ============

    async fn ensure_library(&self, name: &str) -> Result<i64> {
        sqlx::query("INSERT INTO libraries (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;
        let id: i64 = sqlx::query_scalar("SELECT id FROM libraries WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    pub(crate) async fn library_id(&self, name: &str) -> Result<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM libraries WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }
}

/// Shared SELECT head for queries returning full chunks.
const CHUNK_SELECT: &str = "SELECT d.id, l.name AS library, d.version, d.url, d.content,
        d.metadata, d.sort_order, d.indexed_at
 FROM documents d
 JOIN libraries l ON l.id = d.library_id";

/// The text actually embedded for a chunk: a heading header that improves
/// retrieval, prepended to the content. The header is not stored.
fn embedding_text(doc: &DocumentInput) -> String {
    format!(
        "<title>{}</title>\n<url>{}</url>\n<path>{}</path>\n{}",
        doc.metadata.title.as_deref().unwrap_or(""),
        doc.metadata.url,
        doc.metadata.path.join(" / "),
        doc.content
    )
}

/// JSON text used to compare against `json_extract(metadata, '$.path')`.
fn path_json(path: &[String]) -> String {
    serde_json::to_string(path).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn chunk_from_row(row: SqliteRow) -> Result<StoredChunk> {
    let metadata_json: String = row.get("metadata");
    let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
        .map_err(|e| DocdexError::Other(format!("corrupt chunk metadata: {e}")))?;
    let indexed_at: String = row.get("indexed_at");
    Ok(StoredChunk {
        id: row.get("id"),
        library: row.get("library"),
        version: row.get("version"),
        url: row.get("url"),
        content: row.get("content"),
        metadata,
        sort_order: row.get("sort_order"),
        indexed_at: parse_timestamp(indexed_at).unwrap_or_else(Utc::now),
    })
}

fn parse_timestamp(raw: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
