//! Storage abstraction for the index.
//!
//! The [`VectorStore`] trait is everything the indexer and search layers
//! need from persistence: source bookkeeping, atomic source+chunk writes,
//! ordered chunk retrieval and cosine similarity search.
//!
//! Two implementations:
//! - [`SqliteStore`]: a single SQLite file; brute-force scan, or native KNN
//!   through sqlite-vec when built with the `sqlite-vec` feature.
//! - [`MemoryStore`]: process-local, for tests and embedding the engine.
//!
//! Implementations must be `Send + Sync`; many readers may run concurrently
//! and writes are serialized.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::cmp::Ordering;

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::models::{Chunk, Source, StoreStats};

/// One similarity-search candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub source_id: String,
    /// Cosine similarity, higher is closer.
    pub score: f32,
}

/// Persistent collection of sources, chunks and embeddings.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`source_exists`](VectorStore::source_exists) | Is a source indexed? |
/// | [`get_source_hash`](VectorStore::get_source_hash) | Stored content hash, for change detection |
/// | [`add_source`](VectorStore::add_source) | Insert or update a source record |
/// | [`add_chunks`](VectorStore::add_chunks) | Insert chunks (and embeddings) in one transaction |
/// | [`replace_source`](VectorStore::replace_source) | Atomically swap a source and its whole chunk set |
/// | [`delete_source`](VectorStore::delete_source) | Remove a source and, by cascade, its chunks |
/// | [`get_source_chunks`](VectorStore::get_source_chunks) | A source's chunks by `chunk_index` |
/// | [`search_similar`](VectorStore::search_similar) | Top-k cosine search with threshold |
///
/// The first stored embedding fixes the index's dimensionality; writes and
/// queries with any other length fail with
/// [`KnowledgeError::DimensionMismatch`].
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn source_exists(&self, source_id: &str) -> KnowledgeResult<bool>;

    async fn get_source_hash(&self, source_id: &str) -> KnowledgeResult<Option<String>>;

    async fn get_source(&self, source_id: &str) -> KnowledgeResult<Option<Source>>;

    /// All sources, ordered by path.
    async fn list_sources(&self) -> KnowledgeResult<Vec<Source>>;

    /// Insert `source`, or update its hash, size and timestamp if it exists.
    /// Existing chunks are left alone.
    async fn add_source(&self, source: &Source) -> KnowledgeResult<()>;

    /// Insert chunks whose source already exists. All chunks land in one
    /// transaction; a chunk with an existing id or `(source_id, chunk_index)`
    /// replaces the old row.
    async fn add_chunks(&self, chunks: &[Chunk]) -> KnowledgeResult<()>;

    /// Upsert `source` and replace its entire chunk set with `chunks`, as one
    /// atomic write. Readers see either the old set or the new one.
    async fn replace_source(&self, source: &Source, chunks: &[Chunk]) -> KnowledgeResult<()>;

    /// Delete a source and all of its chunks. Returns `false` if it did not exist.
    async fn delete_source(&self, source_id: &str) -> KnowledgeResult<bool>;

    /// A chunk by id, with its embedding if one is stored.
    async fn get_chunk(&self, chunk_id: &str) -> KnowledgeResult<Option<Chunk>>;

    /// A source's chunks ordered by `chunk_index`.
    async fn get_source_chunks(&self, source_id: &str) -> KnowledgeResult<Vec<Chunk>>;

    /// At most `top_k` chunks with similarity ≥ `threshold`, descending by
    /// score, ties broken by chunk id.
    async fn search_similar(
        &self,
        query: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> KnowledgeResult<Vec<ScoredChunk>>;

    async fn get_stats(&self) -> KnowledgeResult<StoreStats>;

    /// `true` when `search_similar` is answered by a native index rather
    /// than an exact scan.
    fn supports_accelerated_search(&self) -> bool;
}

/// Filter by threshold, order by score (then chunk id) and keep `top_k`.
pub(crate) fn rank_candidates(
    mut candidates: Vec<ScoredChunk>,
    top_k: usize,
    threshold: f32,
) -> Vec<ScoredChunk> {
    candidates.retain(|c| c.score >= threshold);
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(top_k);
    candidates
}

/// Fail unless `actual` matches the index's declared dimensionality.
pub(crate) fn check_dims(expected: Option<usize>, actual: usize) -> KnowledgeResult<()> {
    match expected {
        Some(expected) if expected != actual => {
            Err(KnowledgeError::DimensionMismatch { expected, actual })
        }
        _ => Ok(()),
    }
}

/// Dimensionality and model shared by every embedded chunk in a write batch.
///
/// Returns `None` if no chunk carries an embedding.
pub(crate) fn batch_embedding_shape(
    chunks: &[Chunk],
) -> KnowledgeResult<Option<(usize, Option<String>)>> {
    let mut shape: Option<(usize, Option<String>)> = None;
    for chunk in chunks {
        let Some(vector) = chunk.embedding.as_ref() else {
            continue;
        };
        if vector.is_empty() {
            return Err(KnowledgeError::Storage(format!(
                "chunk {} has an empty embedding",
                chunk.chunk_id
            )));
        }
        match &shape {
            None => shape = Some((vector.len(), chunk.embedding_model.clone())),
            Some((dims, _)) => check_dims(Some(*dims), vector.len())?,
        }
    }
    Ok(shape)
}

/// Every chunk in a write must belong to `source_id`.
pub(crate) fn check_chunk_owner(source_id: &str, chunks: &[Chunk]) -> KnowledgeResult<()> {
    match chunks.iter().find(|c| c.source_id != source_id) {
        Some(stray) => Err(KnowledgeError::Storage(format!(
            "chunk {} belongs to source {}, not {}",
            stray.chunk_id, stray.source_id, source_id
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk_id: id.to_string(),
            source_id: "s".to_string(),
            score,
        }
    }

    #[test]
    fn test_rank_candidates_orders_filters_truncates() {
        let ranked = rank_candidates(
            vec![
                scored("c", 0.2),
                scored("b", 0.9),
                scored("a", 0.9),
                scored("d", 0.5),
                scored("e", -0.3),
            ],
            3,
            0.0,
        );
        let ids: Vec<&str> = ranked.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "d"]);
    }

    #[test]
    fn test_check_dims() {
        assert!(check_dims(None, 3).is_ok());
        assert!(check_dims(Some(3), 3).is_ok());
        assert!(matches!(
            check_dims(Some(3), 4),
            Err(KnowledgeError::DimensionMismatch {
                expected: 3,
                actual: 4
            })
        ));
    }
}
