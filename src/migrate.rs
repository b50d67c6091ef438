//! Database schema migrations.
//!
//! Migrations are ordered by their sequential id prefix and tracked in
//! `_schema_migrations`, so running them is idempotent. All outstanding
//! steps are applied inside a single transaction per startup; transient
//! `SQLITE_BUSY` contention is retried with a short backoff.

use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DocdexError, Result};

const BUSY_ATTEMPTS: u32 = 5;
const BUSY_BACKOFF: Duration = Duration::from_millis(200);

struct Migration {
    id: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        id: "001-libraries",
        statements: &[
            "CREATE TABLE IF NOT EXISTS libraries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            )",
        ],
    },
    Migration {
        id: "002-documents",
        statements: &[
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                library_id INTEGER NOT NULL REFERENCES libraries(id),
                version TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                sort_order INTEGER NOT NULL,
                indexed_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_documents_library_version
                ON documents(library_id, version)",
            "CREATE INDEX IF NOT EXISTS idx_documents_url ON documents(url)",
            "CREATE INDEX IF NOT EXISTS idx_documents_sort
                ON documents(library_id, version, url, sort_order)",
        ],
    },
    Migration {
        id: "003-documents-fts",
        statements: &[
            "CREATE VIRTUAL TABLE documents_fts USING fts5(title, url, path, content)",
        ],
    },
    Migration {
        id: "004-documents-vec",
        statements: &[
            "CREATE TABLE IF NOT EXISTS documents_vec (
                document_id INTEGER PRIMARY KEY,
                library_id INTEGER NOT NULL,
                version TEXT NOT NULL,
                embedding BLOB NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_documents_vec_library_version
                ON documents_vec(library_id, version)",
        ],
    },
];

/// Apply all outstanding migrations. Safe to call on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let mut attempt = 0;
    loop {
        match apply_outstanding(pool).await {
            Ok(applied) => {
                if applied > 0 {
                    info!(applied, "schema migrations applied");
                }
                return Ok(());
            }
            Err(e) if e.is_busy() && attempt < BUSY_ATTEMPTS => {
                attempt += 1;
                debug!(attempt, "migration hit SQLITE_BUSY, retrying");
                tokio::time::sleep(BUSY_BACKOFF * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn apply_outstanding(pool: &SqlitePool) -> Result<u32> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _schema_migrations (
            id TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let applied: Vec<String> = sqlx::query("SELECT id FROM _schema_migrations")
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.get::<String, _>("id"))
        .collect();

    let mut tx = pool.begin().await?;
    let mut count = 0;
    for migration in MIGRATIONS {
        if applied.iter().any(|id| id == migration.id) {
            continue;
        }
        for statement in migration.statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| DocdexError::Migration {
                    id: migration.id.to_string(),
                    reason: e.to_string(),
                })?;
        }
        sqlx::query("INSERT INTO _schema_migrations (id, applied_at) VALUES (?, ?)")
            .bind(migration.id)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        count += 1;
    }
    tx.commit().await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        // A single connection so every statement sees the same in-memory db.
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn migrations_run_and_are_idempotent() {
        let pool = memory_pool().await;
        run_migrations(&pool).await.unwrap();
        // Second run is a no-op (would fail on the non-idempotent FTS
        // virtual table if the ledger were ignored).
        run_migrations(&pool).await.unwrap();

        let tables: Vec<String> =
            sqlx::query("SELECT name FROM sqlite_master WHERE type IN ('table') ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap()
                .iter()
                .map(|row| row.get::<String, _>("name"))
                .collect();
        for expected in ["libraries", "documents", "documents_vec", "_schema_migrations"] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
        let fts: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'documents_fts'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(fts >= 1);
    }
}
