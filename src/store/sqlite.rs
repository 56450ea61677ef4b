//! SQLite-backed [`VectorStore`].
//!
//! Sources, chunks and embeddings live in ordinary tables (see
//! [`crate::migrate`]). Every write runs inside one transaction while holding
//! an in-process mutex, so writers are serialized and readers only ever see
//! committed source+chunk sets.
//!
//! Similarity search is an exact cosine scan over all stored vectors. When
//! built with the `sqlite-vec` feature and opened with backend
//! `"sqlite-vec"`, vectors are mirrored into a `vec0` virtual table keyed on
//! `chunks.pk` and KNN queries run natively.
//!
//! Every write bumps `write_generation` in `meta`. The mirror records the
//! generation it reflects in `vec_generation`; writes made without the
//! extension leave it behind, and the next accelerated open rebuilds it.
//! Until then searches fall back to the exact scan.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqliteExecutor, SqlitePool};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{
    batch_embedding_shape, check_chunk_owner, check_dims, rank_candidates, ScoredChunk,
    VectorStore,
};
use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::migrate;
use crate::models::{Chunk, ChunkMetadata, Source, StoreStats};

const META_EMBEDDING_DIMS: &str = "embedding_dims";
const META_EMBEDDING_MODEL: &str = "embedding_model";
const META_WRITE_GENERATION: &str = "write_generation";
const META_VEC_GENERATION: &str = "vec_generation";

const CHUNK_SELECT: &str = r#"
    SELECT c.id, c.source_id, c.chunk_index, c.text, c.start_char, c.end_char,
           c.metadata_json, e.vector, e.model
    FROM chunks c
    LEFT JOIN embeddings e ON e.chunk_id = c.id
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    BruteForce,
    #[cfg(feature = "sqlite-vec")]
    SqliteVec,
}

impl Backend {
    fn parse(name: &str) -> KnowledgeResult<Self> {
        match name {
            "brute-force" => Ok(Backend::BruteForce),
            #[cfg(feature = "sqlite-vec")]
            "sqlite-vec" => Ok(Backend::SqliteVec),
            #[cfg(not(feature = "sqlite-vec"))]
            "sqlite-vec" => Err(KnowledgeError::Validation(
                "store backend 'sqlite-vec' requires building with --features sqlite-vec"
                    .to_string(),
            )),
            other => Err(KnowledgeError::Validation(format!(
                "unknown store backend: {}",
                other
            ))),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Backend::BruteForce => "sqlite/brute-force",
            #[cfg(feature = "sqlite-vec")]
            Backend::SqliteVec => "sqlite/sqlite-vec",
        }
    }

    fn accelerated(self) -> bool {
        !matches!(self, Backend::BruteForce)
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
    db_path: PathBuf,
    backend: Backend,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open or create the index at `db_path` and bring its schema up to date.
    pub async fn open(db_path: &Path, backend: &str) -> KnowledgeResult<Self> {
        let backend = Backend::parse(backend)?;
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;

        let store = Self {
            pool,
            db_path: db_path.to_path_buf(),
            backend,
            write_lock: Mutex::new(()),
        };
        if backend.accelerated() {
            store.sync_vec_index().await?;
        }
        Ok(store)
    }

    pub async fn from_config(config: &Config) -> KnowledgeResult<Self> {
        Self::open(&config.db.path, &config.store.backend).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Rebuild `chunk_vec` from the stored embeddings unless it already
    /// mirrors the latest write.
    async fn sync_vec_index(&self) -> KnowledgeResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        if vec_index_in_sync(&mut tx).await? {
            return Ok(());
        }
        let mirrored = rebuild_vec_table(&mut tx).await?;
        tx.commit().await?;
        tracing::info!(vectors = mirrored, "rebuilt chunk_vec from stored embeddings");
        Ok(())
    }

    /// Advance the write generation. The vec mirror moves with it only when
    /// it reflected the previous generation and this store maintains it.
    async fn record_write(&self, conn: &mut SqliteConnection) -> KnowledgeResult<()> {
        let previous: u64 = meta_number(&mut *conn, META_WRITE_GENERATION)
            .await?
            .unwrap_or(0);
        let next = (previous + 1).to_string();
        let mirrored: Option<u64> = meta_number(&mut *conn, META_VEC_GENERATION).await?;
        if self.backend.accelerated() && mirrored == Some(previous) {
            set_meta(&mut *conn, META_VEC_GENERATION, &next).await?;
        }
        set_meta(&mut *conn, META_WRITE_GENERATION, &next).await?;
        Ok(())
    }

    /// Forget the dimensionality and model once no embeddings remain, so the
    /// next write may come from a different embedder.
    async fn release_dims_if_unused(&self, conn: &mut SqliteConnection) -> KnowledgeResult<()> {
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&mut *conn)
            .await?;
        if remaining > 0 {
            return Ok(());
        }
        sqlx::query("DELETE FROM meta WHERE key IN (?, ?)")
            .bind(META_EMBEDDING_DIMS)
            .bind(META_EMBEDDING_MODEL)
            .execute(&mut *conn)
            .await?;
        if self.backend.accelerated() {
            sqlx::query("DROP TABLE IF EXISTS chunk_vec")
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    /// Insert `chunks` (and their embeddings), replacing rows that collide on
    /// chunk id or `(source_id, chunk_index)`.
    async fn write_chunks(&self, conn: &mut SqliteConnection, chunks: &[Chunk]) -> KnowledgeResult<()> {
        if let Some((dims, model)) = batch_embedding_shape(chunks)? {
            match index_dims(&mut *conn).await? {
                Some(expected) => check_dims(Some(expected), dims)?,
                None => {
                    set_meta(&mut *conn, META_EMBEDDING_DIMS, &dims.to_string()).await?;
                    if self.backend.accelerated() {
                        ensure_vec_table(&mut *conn, dims).await?;
                    }
                }
            }
            if let Some(model) = model {
                set_meta(&mut *conn, META_EMBEDDING_MODEL, &model).await?;
            }
        }

        let now = chrono::Utc::now().timestamp();
        for chunk in chunks {
            if chunk.end_char <= chunk.start_char {
                return Err(KnowledgeError::Storage(format!(
                    "chunk {} has an empty character range",
                    chunk.chunk_id
                )));
            }

            if self.backend.accelerated() && vec_table_exists(&mut *conn).await? {
                sqlx::query(
                    "DELETE FROM chunk_vec WHERE rowid IN \
                     (SELECT pk FROM chunks WHERE id = ? OR (source_id = ? AND chunk_index = ?))",
                )
                .bind(&chunk.chunk_id)
                .bind(&chunk.source_id)
                .bind(chunk.chunk_index)
                .execute(&mut *conn)
                .await?;
            }
            sqlx::query("DELETE FROM chunks WHERE id = ? OR (source_id = ? AND chunk_index = ?)")
                .bind(&chunk.chunk_id)
                .bind(&chunk.source_id)
                .bind(chunk.chunk_index)
                .execute(&mut *conn)
                .await?;

            let metadata_json = serde_json::to_string(&chunk.metadata)
                .map_err(|e| KnowledgeError::Storage(format!("chunk metadata: {}", e)))?;
            let pk = sqlx::query(
                r#"
                INSERT INTO chunks (id, source_id, chunk_index, text, start_char, end_char, metadata_json)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.source_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.start_char as i64)
            .bind(chunk.end_char as i64)
            .bind(&metadata_json)
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();

            let Some(vector) = chunk.embedding.as_ref() else {
                continue;
            };
            let blob = vec_to_blob(vector);
            sqlx::query(
                "INSERT INTO embeddings (chunk_id, model, dims, vector, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.chunk_id)
            .bind(chunk.embedding_model.as_deref().unwrap_or_default())
            .bind(vector.len() as i64)
            .bind(&blob)
            .bind(now)
            .execute(&mut *conn)
            .await?;

            if self.backend.accelerated() {
                sqlx::query("INSERT INTO chunk_vec (rowid, embedding) VALUES (?, ?)")
                    .bind(pk)
                    .bind(&blob)
                    .execute(&mut *conn)
                    .await?;
            }
        }

        Ok(())
    }

    /// Drop every chunk of `source_id` (embeddings follow by cascade).
    async fn clear_source_chunks(
        &self,
        conn: &mut SqliteConnection,
        source_id: &str,
    ) -> KnowledgeResult<()> {
        if self.backend.accelerated() && vec_table_exists(&mut *conn).await? {
            sqlx::query("DELETE FROM chunk_vec WHERE rowid IN (SELECT pk FROM chunks WHERE source_id = ?)")
                .bind(source_id)
                .execute(&mut *conn)
                .await?;
        }
        sqlx::query("DELETE FROM chunks WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn scan_similar(&self, query: &[f32]) -> KnowledgeResult<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            "SELECT e.chunk_id, c.source_id, e.vector FROM embeddings e JOIN chunks c ON c.id = e.chunk_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let vector = blob_to_vec(&row.get::<Vec<u8>, _>("vector"));
            check_dims(Some(query.len()), vector.len())?;
            candidates.push(ScoredChunk {
                chunk_id: row.get("chunk_id"),
                source_id: row.get("source_id"),
                score: cosine_similarity(query, &vector),
            });
        }
        Ok(candidates)
    }

    async fn knn_similar(&self, query: &[f32], top_k: usize) -> KnowledgeResult<Vec<ScoredChunk>> {
        if !vec_table_exists(&self.pool).await? {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.source_id, v.distance
            FROM chunk_vec v
            JOIN chunks c ON c.pk = v.rowid
            WHERE v.embedding MATCH ? AND v.k = ?
            ORDER BY v.distance ASC
            "#,
        )
        .bind(vec_to_blob(query))
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ScoredChunk {
                chunk_id: row.get("id"),
                source_id: row.get("source_id"),
                score: 1.0 - row.get::<f64, _>("distance") as f32,
            })
            .collect())
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn source_exists(&self, source_id: &str) -> KnowledgeResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sources WHERE id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn get_source_hash(&self, source_id: &str) -> KnowledgeResult<Option<String>> {
        let hash: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM sources WHERE id = ?")
                .bind(source_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash)
    }

    async fn get_source(&self, source_id: &str) -> KnowledgeResult<Option<Source>> {
        let row = sqlx::query(
            "SELECT id, path, file_size, mime_type, content_hash, indexed_at FROM sources WHERE id = ?",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_source))
    }

    async fn list_sources(&self) -> KnowledgeResult<Vec<Source>> {
        let rows = sqlx::query(
            "SELECT id, path, file_size, mime_type, content_hash, indexed_at FROM sources ORDER BY path",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_source).collect())
    }

    async fn add_source(&self, source: &Source) -> KnowledgeResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        upsert_source(&mut tx, source).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_chunks(&self, chunks: &[Chunk]) -> KnowledgeResult<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let owners: BTreeSet<&str> = chunks.iter().map(|c| c.source_id.as_str()).collect();
        for owner in owners {
            let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sources WHERE id = ?")
                .bind(owner)
                .fetch_one(&mut *tx)
                .await?;
            if !exists {
                return Err(KnowledgeError::Storage(format!("unknown source: {}", owner)));
            }
        }

        self.write_chunks(&mut tx, chunks).await?;
        self.record_write(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_source(&self, source: &Source, chunks: &[Chunk]) -> KnowledgeResult<()> {
        check_chunk_owner(&source.source_id, chunks)?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        upsert_source(&mut tx, source).await?;
        self.clear_source_chunks(&mut tx, &source.source_id).await?;
        self.release_dims_if_unused(&mut tx).await?;
        self.write_chunks(&mut tx, chunks).await?;
        self.record_write(&mut tx).await?;
        tx.commit().await?;

        tracing::debug!(
            source_id = %source.source_id,
            chunks = chunks.len(),
            "replaced source"
        );
        Ok(())
    }

    async fn delete_source(&self, source_id: &str) -> KnowledgeResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        self.clear_source_chunks(&mut tx, source_id).await?;
        let deleted = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        self.release_dims_if_unused(&mut tx).await?;
        self.record_write(&mut tx).await?;
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn get_chunk(&self, chunk_id: &str) -> KnowledgeResult<Option<Chunk>> {
        let row = sqlx::query(&format!("{} WHERE c.id = ?", CHUNK_SELECT))
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_chunk))
    }

    async fn get_source_chunks(&self, source_id: &str) -> KnowledgeResult<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "{} WHERE c.source_id = ? ORDER BY c.chunk_index ASC",
            CHUNK_SELECT
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn search_similar(
        &self,
        query: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> KnowledgeResult<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let Some(dims) = index_dims(&self.pool).await? else {
            return Ok(Vec::new());
        };
        check_dims(Some(dims), query.len())?;

        let mirror_current = if self.backend.accelerated() {
            let mut conn = self.pool.acquire().await?;
            vec_index_in_sync(&mut conn).await?
        } else {
            false
        };
        let candidates = if mirror_current {
            self.knn_similar(query, top_k).await?
        } else {
            if self.backend.accelerated() {
                tracing::warn!("chunk_vec is behind the stored embeddings; using exact scan");
            }
            self.scan_similar(query).await?
        };
        Ok(rank_candidates(candidates, top_k, threshold))
    }

    async fn get_stats(&self) -> KnowledgeResult<StoreStats> {
        let total_sources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
            .fetch_one(&self.pool)
            .await?;
        let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let total_embeddings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            total_sources: total_sources as usize,
            total_chunks: total_chunks as usize,
            total_embeddings: total_embeddings as usize,
            embedding_model: get_meta(&self.pool, META_EMBEDDING_MODEL).await?,
            embedding_dims: index_dims(&self.pool).await?,
            backend: self.backend.name().to_string(),
            accelerated: self.backend.accelerated(),
            database_path: Some(self.db_path.clone()),
            database_size_bytes: std::fs::metadata(&self.db_path).ok().map(|m| m.len()),
        })
    }

    fn supports_accelerated_search(&self) -> bool {
        self.backend.accelerated()
    }
}

async fn upsert_source(conn: &mut SqliteConnection, source: &Source) -> KnowledgeResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sources (id, path, file_size, mime_type, content_hash, indexed_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            path = excluded.path,
            file_size = excluded.file_size,
            mime_type = excluded.mime_type,
            content_hash = excluded.content_hash,
            indexed_at = excluded.indexed_at
        "#,
    )
    .bind(&source.source_id)
    .bind(source.path.to_string_lossy().as_ref())
    .bind(source.file_size as i64)
    .bind(&source.mime_type)
    .bind(&source.content_hash)
    .bind(source.indexed_at.timestamp_millis())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn get_meta<'e, E: SqliteExecutor<'e>>(exec: E, key: &str) -> KnowledgeResult<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
        .bind(key)
        .fetch_optional(exec)
        .await?;
    Ok(value)
}

async fn set_meta<'e, E: SqliteExecutor<'e>>(exec: E, key: &str, value: &str) -> KnowledgeResult<()> {
    sqlx::query(
        "INSERT INTO meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(exec)
    .await?;
    Ok(())
}

async fn meta_number<'e, E, T>(exec: E, key: &str) -> KnowledgeResult<Option<T>>
where
    E: SqliteExecutor<'e>,
    T: std::str::FromStr,
{
    match get_meta(exec, key).await? {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| KnowledgeError::Storage(format!("corrupt {} value: {}", key, value))),
        None => Ok(None),
    }
}

async fn index_dims<'e, E: SqliteExecutor<'e>>(exec: E) -> KnowledgeResult<Option<usize>> {
    meta_number(exec, META_EMBEDDING_DIMS).await
}

async fn vec_table_exists<'e, E: SqliteExecutor<'e>>(exec: E) -> KnowledgeResult<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'chunk_vec'",
    )
    .fetch_one(exec)
    .await?;
    Ok(exists)
}

async fn ensure_vec_table<'e, E: SqliteExecutor<'e>>(exec: E, dims: usize) -> KnowledgeResult<()> {
    sqlx::query(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS chunk_vec USING vec0(embedding float[{}] distance_metric=cosine)",
        dims
    ))
    .execute(exec)
    .await?;
    Ok(())
}

/// `chunk_vec` reflects the latest write and exists whenever vectors do.
async fn vec_index_in_sync(conn: &mut SqliteConnection) -> KnowledgeResult<bool> {
    let written: u64 = meta_number(&mut *conn, META_WRITE_GENERATION)
        .await?
        .unwrap_or(0);
    let mirrored: Option<u64> = meta_number(&mut *conn, META_VEC_GENERATION).await?;
    if mirrored != Some(written) {
        return Ok(false);
    }
    Ok(index_dims(&mut *conn).await?.is_none() || vec_table_exists(&mut *conn).await?)
}

/// Recreate `chunk_vec` at the index's dimensionality and copy every stored
/// embedding into it. Returns the number of vectors mirrored.
async fn rebuild_vec_table(conn: &mut SqliteConnection) -> KnowledgeResult<usize> {
    sqlx::query("DROP TABLE IF EXISTS chunk_vec")
        .execute(&mut *conn)
        .await?;

    let mut mirrored = 0;
    if let Some(dims) = index_dims(&mut *conn).await? {
        ensure_vec_table(&mut *conn, dims).await?;
        let rows = sqlx::query(
            "SELECT c.pk, e.vector FROM chunks c JOIN embeddings e ON e.chunk_id = c.id",
        )
        .fetch_all(&mut *conn)
        .await?;
        for row in &rows {
            sqlx::query("INSERT INTO chunk_vec (rowid, embedding) VALUES (?, ?)")
                .bind(row.get::<i64, _>("pk"))
                .bind(row.get::<Vec<u8>, _>("vector"))
                .execute(&mut *conn)
                .await?;
        }
        mirrored = rows.len();
    }

    let written: u64 = meta_number(&mut *conn, META_WRITE_GENERATION)
        .await?
        .unwrap_or(0);
    set_meta(&mut *conn, META_VEC_GENERATION, &written.to_string()).await?;
    Ok(mirrored)
}

fn row_to_source(row: &SqliteRow) -> Source {
    let indexed_at: i64 = row.get("indexed_at");
    Source {
        source_id: row.get("id"),
        path: PathBuf::from(row.get::<String, _>("path")),
        file_size: row.get::<i64, _>("file_size") as u64,
        mime_type: row.get("mime_type"),
        content_hash: row.get("content_hash"),
        indexed_at: chrono::DateTime::from_timestamp_millis(indexed_at).unwrap_or_default(),
    }
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let metadata: ChunkMetadata =
        serde_json::from_str(&row.get::<String, _>("metadata_json")).unwrap_or_default();
    Chunk {
        chunk_id: row.get("id"),
        source_id: row.get("source_id"),
        text: row.get("text"),
        chunk_index: row.get("chunk_index"),
        start_char: row.get::<i64, _>("start_char") as usize,
        end_char: row.get::<i64, _>("end_char") as usize,
        metadata,
        embedding: row
            .get::<Option<Vec<u8>>, _>("vector")
            .map(|blob| blob_to_vec(&blob)),
        embedding_model: row.get("model"),
    }
}
