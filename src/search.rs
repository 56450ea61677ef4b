//! Semantic retrieval over a [`VectorStore`].
//!
//! # Query flow
//!
//! 1. Empty or whitespace-only query → empty result, no embedding call.
//! 2. Embed the query (exactly one vector).
//! 3. Ask the store for `top_k × overfetch_factor` candidates at the threshold.
//! 4. Resolve each candidate's chunk and source path, skipping any that
//!    vanished in between.
//! 5. Truncate to `top_k` and number hits `1..=n` in score order.
//!
//! Every failure in this flow surfaces as [`KnowledgeError::Search`]. The
//! one exception is context expansion in
//! [`SearchEngine::search_with_context`], which falls back to the bare chunk
//! text.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, Embedder};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::models::{Chunk, SearchCapabilities, SearchHit, SearchStats};
use crate::store::{ScoredChunk, VectorStore};

/// Per-query tuning.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    pub similarity_threshold: f32,
    /// When `false`, returned chunks have their metadata cleared.
    pub include_metadata: bool,
    /// Candidates requested from the store per wanted hit.
    pub overfetch_factor: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            similarity_threshold: 0.0,
            include_metadata: true,
            overfetch_factor: 2,
        }
    }
}

impl SearchOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            similarity_threshold: config.similarity_threshold,
            include_metadata: true,
            overfetch_factor: config.overfetch_factor,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }

    fn candidate_count(&self, extra: usize) -> usize {
        self.top_k
            .saturating_add(extra)
            .saturating_mul(self.overfetch_factor.max(1))
    }
}

pub struct SearchEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Chunks most similar to `query`, best first.
    pub async fn search(&self, query: &str, opts: &SearchOptions) -> KnowledgeResult<Vec<SearchHit>> {
        if query.trim().is_empty() || opts.top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(|e| KnowledgeError::Search(format!("query embedding failed: {:#}", e)))?;

        let candidates = self
            .store
            .search_similar(&vector, opts.candidate_count(0), opts.similarity_threshold)
            .await
            .map_err(KnowledgeError::search)?;
        debug!(
            query_chars = query.chars().count(),
            candidates = candidates.len(),
            "semantic search"
        );

        self.assemble_hits(candidates, opts)
            .await
            .map_err(KnowledgeError::search)
    }

    /// Like [`search`](Self::search), with each hit's text widened by up to
    /// `context_chars` characters on each side, taken from neighbouring
    /// chunks of the same source.
    pub async fn search_with_context(
        &self,
        query: &str,
        context_chars: usize,
        opts: &SearchOptions,
    ) -> KnowledgeResult<Vec<SearchHit>> {
        let mut hits = self.search(query, opts).await?;
        if context_chars == 0 {
            return Ok(hits);
        }

        let mut neighbours: HashMap<String, Vec<Chunk>> = HashMap::new();
        for hit in &mut hits {
            let source_id = hit.chunk.source_id.clone();
            if !neighbours.contains_key(&source_id) {
                match self.store.get_source_chunks(&source_id).await {
                    Ok(chunks) => {
                        neighbours.insert(source_id.clone(), chunks);
                    }
                    Err(e) => {
                        warn!(chunk_id = %hit.chunk.chunk_id, error = %e, "context expansion failed");
                        continue;
                    }
                }
            }
            if let Some(chunks) = neighbours.get(&source_id) {
                hit.chunk.text = expand_with_neighbours(&hit.chunk, chunks, context_chars);
            }
        }
        Ok(hits)
    }

    /// Chunks most similar to an already indexed chunk, excluding that chunk.
    ///
    /// # Errors
    ///
    /// [`KnowledgeError::Search`] if the chunk does not exist or has no
    /// stored embedding.
    pub async fn find_similar_chunks(
        &self,
        chunk_id: &str,
        opts: &SearchOptions,
    ) -> KnowledgeResult<Vec<SearchHit>> {
        let reference = self
            .store
            .get_chunk(chunk_id)
            .await
            .map_err(KnowledgeError::search)?
            .ok_or_else(|| KnowledgeError::Search(format!("chunk not found: {}", chunk_id)))?;
        let vector = reference
            .embedding
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                KnowledgeError::Search(format!("chunk has no embedding: {}", chunk_id))
            })?;

        if opts.top_k == 0 {
            return Ok(Vec::new());
        }

        let mut candidates = self
            .store
            .search_similar(&vector, opts.candidate_count(1), opts.similarity_threshold)
            .await
            .map_err(KnowledgeError::search)?;
        candidates.retain(|c| c.chunk_id != chunk_id);

        self.assemble_hits(candidates, opts)
            .await
            .map_err(KnowledgeError::search)
    }

    pub async fn get_search_stats(&self) -> KnowledgeResult<SearchStats> {
        let stats = self.store.get_stats().await.map_err(KnowledgeError::search)?;
        let semantic = self.embedder.dims() > 0;
        Ok(SearchStats {
            embedding_model: self.embedder.model_name().to_string(),
            embedding_dims: self.embedder.dims(),
            total_sources: stats.total_sources,
            total_chunks: stats.total_chunks,
            total_embeddings: stats.total_embeddings,
            backend: stats.backend,
            capabilities: SearchCapabilities {
                semantic_search: semantic,
                context_search: semantic,
                similar_chunk_search: stats.total_embeddings > 0,
                accelerated_backend: self.store.supports_accelerated_search(),
            },
        })
    }

    /// Turn ranked candidates into at most `top_k` hits, numbered from 1.
    async fn assemble_hits(
        &self,
        candidates: Vec<ScoredChunk>,
        opts: &SearchOptions,
    ) -> KnowledgeResult<Vec<SearchHit>> {
        let mut paths: HashMap<String, Option<PathBuf>> = HashMap::new();
        let mut hits = Vec::with_capacity(opts.top_k.min(candidates.len()));

        for candidate in candidates {
            if hits.len() == opts.top_k {
                break;
            }

            let Some(mut chunk) = self.store.get_chunk(&candidate.chunk_id).await? else {
                debug!(chunk_id = %candidate.chunk_id, "candidate vanished");
                continue;
            };

            if !paths.contains_key(&candidate.source_id) {
                let path = self
                    .store
                    .get_source(&candidate.source_id)
                    .await?
                    .map(|s| s.path);
                paths.insert(candidate.source_id.clone(), path);
            }
            let Some(Some(source_path)) = paths.get(&candidate.source_id).cloned() else {
                continue;
            };

            if !opts.include_metadata {
                chunk.metadata.clear();
            }
            hits.push(SearchHit {
                chunk,
                similarity_score: candidate.score,
                rank: hits.len() + 1,
                source_path,
            });
        }

        Ok(hits)
    }
}

/// `chunk.text` plus up to `context_chars` characters of directly adjacent
/// text on each side, read from `neighbours` by character offset.
///
/// Expansion stops at the first offset no neighbour covers.
fn expand_with_neighbours(chunk: &Chunk, neighbours: &[Chunk], context_chars: usize) -> String {
    let before_start = chunk.start_char.saturating_sub(context_chars);
    let after_end = chunk.end_char.saturating_add(context_chars);

    let mut before: Vec<Option<char>> = vec![None; chunk.start_char - before_start];
    let mut after: Vec<Option<char>> = vec![None; after_end - chunk.end_char];

    for n in neighbours.iter().filter(|n| n.chunk_id != chunk.chunk_id) {
        if n.end_char <= before_start || n.start_char >= after_end {
            continue;
        }
        for (offset, c) in (n.start_char..).zip(n.text.chars()) {
            if offset >= n.end_char {
                break;
            }
            if (before_start..chunk.start_char).contains(&offset) {
                before[offset - before_start] = Some(c);
            } else if (chunk.end_char..after_end).contains(&offset) {
                after[offset - chunk.end_char] = Some(c);
            }
        }
    }

    let prefix: String = {
        let mut chars: Vec<char> = before.iter().rev().map_while(|c| *c).collect();
        chars.reverse();
        chars.into_iter().collect()
    };
    let suffix: String = after.iter().map_while(|c| *c).collect();

    let mut text = String::with_capacity(prefix.len() + chunk.text.len() + suffix.len());
    text.push_str(&prefix);
    text.push_str(&chunk.text);
    text.push_str(&suffix);
    text
}
