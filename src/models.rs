//! Core data models used throughout the engine.
//!
//! [`Source`] and [`Chunk`] are persisted by a
//! [`VectorStore`](crate::store::VectorStore); [`SearchHit`] and the summary
//! types only live for the duration of one operation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata key: 1-based line of the chunk's first character.
pub const META_START_LINE: &str = "start_line";
/// Metadata key: 1-based line of the chunk's last character.
pub const META_END_LINE: &str = "end_line";
/// Metadata key: number of characters in the chunk.
pub const META_CHAR_COUNT: &str = "char_count";
/// Metadata key: mime type of the owning source, set by the indexer.
pub const META_MIME_TYPE: &str = "mime_type";

/// Open key/value metadata attached to a chunk.
///
/// The engine writes the `META_*` keys; callers may add anything else.
pub type ChunkMetadata = BTreeMap<String, serde_json::Value>;

/// One indexed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Stable id derived from the absolute path.
    pub source_id: String,
    pub path: PathBuf,
    pub file_size: u64,
    pub mime_type: String,
    /// SHA-256 of the file bytes, lowercase hex.
    pub content_hash: String,
    pub indexed_at: DateTime<Utc>,
}

/// A contiguous, possibly overlapping segment of a source's normalized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub source_id: String,
    pub text: String,
    pub chunk_index: i64,
    /// Character (not byte) offset into the normalized text, inclusive.
    pub start_char: usize,
    /// Character offset into the normalized text, exclusive.
    pub end_char: usize,
    #[serde(default)]
    pub metadata: ChunkMetadata,
    #[serde(skip_serializing, default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub embedding_model: Option<String>,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.end_char - self.start_char
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|v| !v.is_empty())
    }
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub similarity_score: f32,
    /// 1-based position in the result list.
    pub rank: usize,
    pub source_path: PathBuf,
}

/// Per-file failure recorded by a batch indexing run.
#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of one `index_files` / `index_directory` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexSummary {
    pub total_files: usize,
    pub processed_files: usize,
    pub skipped_files: usize,
    pub error_files: usize,
    pub total_chunks: usize,
    pub total_embeddings: usize,
    pub errors: Vec<FileError>,
}

/// Counters reported by a vector store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total_sources: usize,
    pub total_chunks: usize,
    pub total_embeddings: usize,
    pub embedding_model: Option<String>,
    pub embedding_dims: Option<usize>,
    /// Short backend name, e.g. `"sqlite/brute-force"`.
    pub backend: String,
    pub accelerated: bool,
    pub database_path: Option<PathBuf>,
    pub database_size_bytes: Option<u64>,
}

/// Store stats plus the indexer's own configuration.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub store: StoreStats,
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

/// Which query styles a search engine can answer.
#[derive(Debug, Clone, Serialize)]
pub struct SearchCapabilities {
    pub semantic_search: bool,
    pub context_search: bool,
    pub similar_chunk_search: bool,
    pub accelerated_backend: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchStats {
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub total_sources: usize,
    pub total_chunks: usize,
    pub total_embeddings: usize,
    pub backend: String,
    pub capabilities: SearchCapabilities,
}
