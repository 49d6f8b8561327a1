//! SQLite-backed [`VectorIndex`].
//!
//! Rows are the source of truth across restarts; an in-process
//! [`IndexSnapshot`] serves queries. Every write runs in one SQLite
//! transaction and the new snapshot is published only after the commit
//! succeeds, so a failed write leaves both the file and the visible index
//! untouched.
//!
//! Schema (see [`migrate`](crate::migrate)): `documents`, `chunks` (one row
//! per index entry, vector stored as little-endian `f32` BLOB), and
//! `index_meta` holding the `(model_id, dims)` binding.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use hr_assistant_core::embedding::{blob_to_vec, vec_to_blob};
use hr_assistant_core::models::{Chunk, DocumentKind, DocumentSummary, Embedding, IndexEntry};
use hr_assistant_core::store::{
    IndexBinding, IndexSnapshot, IndexStats, ScoredEntry, SnapshotCell, VectorIndex,
};
use hr_assistant_core::{Error, Result};

use crate::{db, migrate};

pub struct SqliteIndex {
    pool: SqlitePool,
    cell: SnapshotCell,
}

fn storage(e: impl std::fmt::Display) -> Error {
    Error::storage(e.to_string())
}

/// Read a non-negative integer column, rejecting values a corrupt or
/// foreign database could hold.
fn get_usize(row: &SqliteRow, column: &str) -> Result<usize> {
    let value: i64 = row.try_get(column).map_err(storage)?;
    usize::try_from(value)
        .map_err(|_| Error::storage(format!("invalid {} in index row: {}", column, value)))
}

impl SqliteIndex {
    /// Open the index at `path`, creating the schema if needed, and load
    /// its contents.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        let snapshot = load_snapshot(&pool).await?;
        tracing::debug!(
            path = %path.display(),
            entries = snapshot.len(),
            "opened vector index"
        );
        Ok(Self {
            pool,
            cell: SnapshotCell::new(snapshot),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn load_snapshot(pool: &SqlitePool) -> Result<IndexSnapshot> {
    let binding = sqlx::query("SELECT model_id, dims FROM index_meta WHERE id = 1")
        .fetch_optional(pool)
        .await
        .map_err(storage)?
        .map(|row| -> Result<IndexBinding> {
            Ok(IndexBinding {
                model_id: row.try_get("model_id").map_err(storage)?,
                dims: get_usize(&row, "dims")?,
            })
        })
        .transpose()?;

    let rows = sqlx::query(
        "SELECT chunk_id, document_id, document_name, ordinal, start_offset, end_offset, \
         text, vector, vector_dim, model_id FROM chunks",
    )
    .fetch_all(pool)
    .await
    .map_err(storage)?;

    let entries = rows
        .iter()
        .map(|row| {
            let chunk_id: String = row.try_get("chunk_id").map_err(storage)?;
            let blob: Vec<u8> = row.try_get("vector").map_err(storage)?;
            let values = blob_to_vec(&blob);
            let dims = get_usize(row, "vector_dim")?;
            if blob.len() % 4 != 0 || values.len() != dims {
                return Err(Error::storage(format!(
                    "chunk {} has a {}-byte vector, expected {} dimensions",
                    chunk_id,
                    blob.len(),
                    dims
                )));
            }
            Ok(IndexEntry {
                chunk: Chunk {
                    id: chunk_id,
                    document_id: row.try_get("document_id").map_err(storage)?,
                    ordinal: get_usize(row, "ordinal")?,
                    text: row.try_get("text").map_err(storage)?,
                    start: get_usize(row, "start_offset")?,
                    end: get_usize(row, "end_offset")?,
                },
                document_name: row.try_get("document_name").map_err(storage)?,
                embedding: Embedding::new(
                    row.try_get::<String, _>("model_id").map_err(storage)?,
                    values,
                ),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let doc_rows = sqlx::query(
        r#"
        SELECT d.id, d.name, d.source_path, d.kind, d.content_hash, d.ingested_at,
               (SELECT COUNT(*) FROM chunks c WHERE c.document_id = d.id) AS chunk_count
        FROM documents d
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(storage)?;

    let documents = doc_rows
        .iter()
        .map(|row| {
            let id: String = row.try_get("id").map_err(storage)?;
            let kind: String = row.try_get("kind").map_err(storage)?;
            let kind = DocumentKind::parse(&kind).ok_or_else(|| {
                Error::storage(format!("document {} has unknown kind '{}'", id, kind))
            })?;
            let ingested_at: i64 = row.try_get("ingested_at").map_err(storage)?;
            let ingested_at = chrono::DateTime::from_timestamp(ingested_at, 0).ok_or_else(|| {
                Error::storage(format!("document {} has invalid timestamp {}", id, ingested_at))
            })?;
            Ok(DocumentSummary {
                name: row.try_get("name").map_err(storage)?,
                source_path: row.try_get("source_path").map_err(storage)?,
                kind,
                content_hash: row.try_get("content_hash").map_err(storage)?,
                ingested_at,
                chunk_count: get_usize(row, "chunk_count")?,
                id,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(IndexSnapshot::from_parts(binding, entries, documents))
}

async fn write_binding(tx: &mut Transaction<'_, Sqlite>, snapshot: &IndexSnapshot) -> Result<()> {
    match snapshot.binding() {
        Some(b) => {
            sqlx::query(
                r#"
                INSERT INTO index_meta (id, model_id, dims) VALUES (1, ?, ?)
                ON CONFLICT(id) DO UPDATE SET model_id = excluded.model_id, dims = excluded.dims
                "#,
            )
            .bind(&b.model_id)
            .bind(b.dims as i64)
            .execute(&mut **tx)
            .await
            .map_err(storage)?;
        }
        None => {
            sqlx::query("DELETE FROM index_meta")
                .execute(&mut **tx)
                .await
                .map_err(storage)?;
        }
    }
    Ok(())
}

async fn insert_entry(tx: &mut Transaction<'_, Sqlite>, entry: &IndexEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chunks (chunk_id, document_id, document_name, ordinal, start_offset,
                            end_offset, text, vector, vector_dim, model_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            document_id = excluded.document_id,
            document_name = excluded.document_name,
            ordinal = excluded.ordinal,
            start_offset = excluded.start_offset,
            end_offset = excluded.end_offset,
            text = excluded.text,
            vector = excluded.vector,
            vector_dim = excluded.vector_dim,
            model_id = excluded.model_id
        "#,
    )
    .bind(&entry.chunk.id)
    .bind(&entry.chunk.document_id)
    .bind(&entry.document_name)
    .bind(entry.chunk.ordinal as i64)
    .bind(entry.chunk.start as i64)
    .bind(entry.chunk.end as i64)
    .bind(&entry.chunk.text)
    .bind(vec_to_blob(&entry.embedding.values))
    .bind(entry.embedding.dims() as i64)
    .bind(&entry.embedding.model_id)
    .execute(&mut **tx)
    .await
    .map_err(storage)?;
    Ok(())
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let _guard = self.cell.lock_writer().await;
        let mut next = self.cell.draft();
        next.apply_upsert(entries.clone())?;

        let mut tx = self.pool.begin().await.map_err(storage)?;
        for entry in &entries {
            insert_entry(&mut tx, entry).await?;
        }
        write_binding(&mut tx, &next).await?;
        tx.commit().await.map_err(storage)?;

        self.cell.publish(next);
        Ok(())
    }

    async fn replace_document(
        &self,
        document: DocumentSummary,
        entries: Vec<IndexEntry>,
    ) -> Result<()> {
        let _guard = self.cell.lock_writer().await;
        let mut next = self.cell.draft();
        next.apply_replace(document.clone(), entries.clone())?;

        let mut tx = self.pool.begin().await.map_err(storage)?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&document.id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, name, source_path, kind, content_hash, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                source_path = excluded.source_path,
                kind = excluded.kind,
                content_hash = excluded.content_hash,
                ingested_at = excluded.ingested_at
            "#,
        )
        .bind(&document.id)
        .bind(&document.name)
        .bind(&document.source_path)
        .bind(document.kind.as_str())
        .bind(&document.content_hash)
        .bind(document.ingested_at.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
        for entry in &entries {
            insert_entry(&mut tx, entry).await?;
        }
        write_binding(&mut tx, &next).await?;
        tx.commit().await.map_err(storage)?;

        self.cell.publish(next);
        Ok(())
    }

    async fn query(&self, vector: &[f32], model_id: &str, k: usize) -> Result<Vec<ScoredEntry>> {
        self.cell.load().search(vector, model_id, k)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let _guard = self.cell.lock_writer().await;
        let mut next = self.cell.draft();
        let removed = next.apply_delete(document_id);

        let mut tx = self.pool.begin().await.map_err(storage)?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        tx.commit().await.map_err(storage)?;

        self.cell.publish(next);
        Ok(removed)
    }

    async fn document_hash(&self, document_id: &str) -> Result<Option<String>> {
        Ok(self.cell.load().document_hash(document_id))
    }

    async fn documents(&self) -> Result<Vec<DocumentSummary>> {
        Ok(self.cell.load().documents())
    }

    async fn stats(&self) -> Result<IndexStats> {
        Ok(self.cell.load().stats())
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.cell.load().is_empty())
    }

    async fn binding(&self) -> Result<Option<IndexBinding>> {
        Ok(self.cell.load().binding().cloned())
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.cell.lock_writer().await;
        let mut tx = self.pool.begin().await.map_err(storage)?;
        for stmt in [
            "DELETE FROM chunks",
            "DELETE FROM documents",
            "DELETE FROM index_meta",
        ] {
            sqlx::query(stmt)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }
        tx.commit().await.map_err(storage)?;

        self.cell.publish(IndexSnapshot::default());
        Ok(())
    }
}
