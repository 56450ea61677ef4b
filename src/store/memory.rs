//! In-memory [`VectorStore`] for tests and embedding the engine in-process.
//!
//! All state sits behind a single `std::sync::RwLock`, so a source and its
//! chunks always change together. Search is brute-force cosine similarity.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{
    batch_embedding_shape, check_chunk_owner, check_dims, rank_candidates, ScoredChunk,
    VectorStore,
};
use crate::embedding::cosine_similarity;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::models::{Chunk, Source, StoreStats};

#[derive(Default)]
struct State {
    sources: HashMap<String, Source>,
    chunks: HashMap<String, Chunk>,
    dims: Option<usize>,
    model: Option<String>,
}

impl State {
    /// Dims that bind a write replacing `replacing`: none once no other
    /// embedded chunk would survive it.
    fn binding_dims(&self, replacing: Option<&str>) -> Option<usize> {
        let survivors = self
            .chunks
            .values()
            .any(|c| c.has_embedding() && Some(c.source_id.as_str()) != replacing);
        if survivors {
            self.dims
        } else {
            None
        }
    }

    /// Check a batch's embedding shape and adopt its dims and model.
    fn accept_shape(&mut self, chunks: &[Chunk], replacing: Option<&str>) -> KnowledgeResult<()> {
        if let Some((dims, model)) = batch_embedding_shape(chunks)? {
            check_dims(self.binding_dims(replacing), dims)?;
            self.dims = Some(dims);
            if model.is_some() {
                self.model = model;
            }
        }
        Ok(())
    }

    fn release_dims_if_unused(&mut self) {
        if !self.chunks.values().any(|c| c.has_embedding()) {
            self.dims = None;
            self.model = None;
        }
    }

    fn insert_chunks(&mut self, chunks: &[Chunk]) {
        let slots: HashSet<(&str, i64)> = chunks
            .iter()
            .map(|c| (c.source_id.as_str(), c.chunk_index))
            .collect();
        self.chunks
            .retain(|_, c| !slots.contains(&(c.source_id.as_str(), c.chunk_index)));
        for chunk in chunks {
            self.chunks.insert(chunk.chunk_id.clone(), chunk.clone());
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> KnowledgeResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| KnowledgeError::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> KnowledgeResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| KnowledgeError::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn source_exists(&self, source_id: &str) -> KnowledgeResult<bool> {
        Ok(self.read()?.sources.contains_key(source_id))
    }

    async fn get_source_hash(&self, source_id: &str) -> KnowledgeResult<Option<String>> {
        Ok(self
            .read()?
            .sources
            .get(source_id)
            .map(|s| s.content_hash.clone()))
    }

    async fn get_source(&self, source_id: &str) -> KnowledgeResult<Option<Source>> {
        Ok(self.read()?.sources.get(source_id).cloned())
    }

    async fn list_sources(&self) -> KnowledgeResult<Vec<Source>> {
        let mut sources: Vec<Source> = self.read()?.sources.values().cloned().collect();
        sources.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(sources)
    }

    async fn add_source(&self, source: &Source) -> KnowledgeResult<()> {
        self.write()?
            .sources
            .insert(source.source_id.clone(), source.clone());
        Ok(())
    }

    async fn add_chunks(&self, chunks: &[Chunk]) -> KnowledgeResult<()> {
        let mut state = self.write()?;
        if let Some(stray) = chunks
            .iter()
            .find(|c| !state.sources.contains_key(&c.source_id))
        {
            return Err(KnowledgeError::Storage(format!(
                "unknown source: {}",
                stray.source_id
            )));
        }
        state.accept_shape(chunks, None)?;
        state.insert_chunks(chunks);
        Ok(())
    }

    async fn replace_source(&self, source: &Source, chunks: &[Chunk]) -> KnowledgeResult<()> {
        check_chunk_owner(&source.source_id, chunks)?;

        let mut state = self.write()?;
        state.accept_shape(chunks, Some(source.source_id.as_str()))?;
        state.chunks.retain(|_, c| c.source_id != source.source_id);
        state
            .sources
            .insert(source.source_id.clone(), source.clone());
        state.insert_chunks(chunks);
        state.release_dims_if_unused();
        Ok(())
    }

    async fn delete_source(&self, source_id: &str) -> KnowledgeResult<bool> {
        let mut state = self.write()?;
        let existed = state.sources.remove(source_id).is_some();
        state.chunks.retain(|_, c| c.source_id != source_id);
        state.release_dims_if_unused();
        Ok(existed)
    }

    async fn get_chunk(&self, chunk_id: &str) -> KnowledgeResult<Option<Chunk>> {
        Ok(self.read()?.chunks.get(chunk_id).cloned())
    }

    async fn get_source_chunks(&self, source_id: &str) -> KnowledgeResult<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = self
            .read()?
            .chunks
            .values()
            .filter(|c| c.source_id == source_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn search_similar(
        &self,
        query: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> KnowledgeResult<Vec<ScoredChunk>> {
        let state = self.read()?;
        let Some(dims) = state.dims else {
            return Ok(Vec::new());
        };
        check_dims(Some(dims), query.len())?;

        let candidates = state
            .chunks
            .values()
            .filter_map(|c| {
                c.embedding.as_ref().map(|v| ScoredChunk {
                    chunk_id: c.chunk_id.clone(),
                    source_id: c.source_id.clone(),
                    score: cosine_similarity(query, v),
                })
            })
            .collect();
        Ok(rank_candidates(candidates, top_k, threshold))
    }

    async fn get_stats(&self) -> KnowledgeResult<StoreStats> {
        let state = self.read()?;
        Ok(StoreStats {
            total_sources: state.sources.len(),
            total_chunks: state.chunks.len(),
            total_embeddings: state.chunks.values().filter(|c| c.has_embedding()).count(),
            embedding_model: state.model.clone(),
            embedding_dims: state.dims,
            backend: "memory/brute-force".to_string(),
            accelerated: false,
            database_path: None,
            database_size_bytes: None,
        })
    }

    fn supports_accelerated_search(&self) -> bool {
        false
    }
}
