//! Indexing pipeline.
//!
//! Drives files through loader → chunker → embedder → store:
//!
//! 1. Load the file and compute its content hash ([`SourceLoader`]).
//! 2. Skip it if the store already holds the same hash and no reindex was forced.
//! 3. Chunk the text and embed every chunk, batched per file when the
//!    embedder allows it.
//! 4. Atomically replace the source and its chunks in the store.
//!
//! Batch entry points never abort on a bad file: each failure is logged,
//! counted in [`IndexSummary::error_files`] and recorded in
//! [`IndexSummary::errors`].

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::loader::{absolute_path, source_id_for_path, SourceLoader};
use crate::models::{Chunk, FileError, IndexStats, IndexSummary, META_MIME_TYPE};
use crate::store::VectorStore;

/// Directory-walk exclusions applied before any configured ones.
pub const DEFAULT_EXCLUDE_GLOBS: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

enum FileOutcome {
    Skipped,
    Processed { chunks: usize, embeddings: usize },
}

pub struct Indexer {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    loader: SourceLoader,
    excludes: GlobSet,
    follow_symlinks: bool,
}

impl Indexer {
    /// Build an indexer with the default walk exclusions and no symlink following.
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        chunker: Chunker,
        loader: SourceLoader,
    ) -> KnowledgeResult<Self> {
        Ok(Self {
            store,
            embedder,
            chunker,
            loader,
            excludes: build_excludes(&[])?,
            follow_symlinks: false,
        })
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> KnowledgeResult<Self> {
        let chunker = Chunker::new(config.chunking.clone())?;
        let loader = SourceLoader::new(config.loader.max_file_size);
        Ok(Self {
            store,
            embedder,
            chunker,
            loader,
            excludes: build_excludes(&config.index.exclude_globs)?,
            follow_symlinks: config.index.follow_symlinks,
        })
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Index each path independently. Per-file failures are recorded in the
    /// summary, never returned.
    pub async fn index_files<P: AsRef<Path>>(&self, paths: &[P], force_reindex: bool) -> IndexSummary {
        let mut summary = IndexSummary {
            total_files: paths.len(),
            ..IndexSummary::default()
        };

        for path in paths {
            let path = path.as_ref();
            match self.index_file(path, force_reindex).await {
                Ok(FileOutcome::Skipped) => {
                    debug!(path = %path.display(), "unchanged, skipped");
                    summary.skipped_files += 1;
                }
                Ok(FileOutcome::Processed { chunks, embeddings }) => {
                    info!(path = %path.display(), chunks, embeddings, "indexed");
                    summary.processed_files += 1;
                    summary.total_chunks += chunks;
                    summary.total_embeddings += embeddings;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to index file");
                    summary.error_files += 1;
                    summary.errors.push(FileError {
                        path: path.to_path_buf(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            total = summary.total_files,
            processed = summary.processed_files,
            skipped = summary.skipped_files,
            errors = summary.error_files,
            chunks = summary.total_chunks,
            "index batch complete"
        );
        summary
    }

    /// Index every supported file under `dir`.
    ///
    /// # Errors
    ///
    /// [`KnowledgeError::Index`] if `dir` is not a directory. Failures of
    /// individual files are reported in the summary instead.
    pub async fn index_directory(
        &self,
        dir: &Path,
        recursive: bool,
        force_reindex: bool,
    ) -> KnowledgeResult<IndexSummary> {
        let files = self.collect_files(dir, recursive)?;
        debug!(dir = %dir.display(), files = files.len(), "collected files");
        Ok(self.index_files(&files, force_reindex).await)
    }

    /// Re-index by content hash alone: unchanged files are skipped, changed
    /// ones reprocessed.
    ///
    /// Directories in `paths` are walked recursively. With no paths, every
    /// source already in the store is revisited; sources whose files have
    /// disappeared show up as per-file errors. Stale sources are not pruned.
    pub async fn reindex_changed_files<P: AsRef<Path>>(
        &self,
        paths: &[P],
    ) -> KnowledgeResult<IndexSummary> {
        let mut files: Vec<PathBuf> = Vec::new();
        if paths.is_empty() {
            files.extend(self.store.list_sources().await?.into_iter().map(|s| s.path));
        }
        for path in paths {
            let path = path.as_ref();
            if path.is_dir() {
                files.extend(self.collect_files(path, true)?);
            } else {
                files.push(path.to_path_buf());
            }
        }
        Ok(self.index_files(&files, false).await)
    }

    /// Remove a source, given either its id or a path to the file.
    ///
    /// Returns `false` if nothing was indexed under that id or path.
    pub async fn remove_source(&self, path_or_id: &str) -> KnowledgeResult<bool> {
        let as_path = Path::new(path_or_id);
        let wrap = |e: KnowledgeError| KnowledgeError::index(as_path, e);

        let source_id = if self.store.source_exists(path_or_id).await.map_err(wrap)? {
            path_or_id.to_string()
        } else {
            source_id_for_path(&absolute_path(as_path).map_err(wrap)?)
        };

        let removed = self.store.delete_source(&source_id).await.map_err(wrap)?;
        if removed {
            info!(source_id = %source_id, "removed source");
        } else {
            debug!(path_or_id, "no such source");
        }
        Ok(removed)
    }

    pub async fn get_index_stats(&self) -> KnowledgeResult<IndexStats> {
        let config = self.chunker.config();
        Ok(IndexStats {
            store: self.store.get_stats().await?,
            embedding_model: self.embedder.model_name().to_string(),
            embedding_dims: self.embedder.dims(),
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            min_chunk_size: config.min_chunk_size,
        })
    }

    async fn index_file(&self, path: &Path, force_reindex: bool) -> KnowledgeResult<FileOutcome> {
        let loaded = self.loader.load(path)?;
        let source = loaded.source;

        let stored_hash = self.store.get_source_hash(&source.source_id).await?;
        if !force_reindex && stored_hash.as_deref() == Some(source.content_hash.as_str()) {
            return Ok(FileOutcome::Skipped);
        }

        let mut chunks = self.chunker.chunk(&loaded.text, &source.source_id, 0);
        for chunk in &mut chunks {
            chunk
                .metadata
                .insert(META_MIME_TYPE.to_string(), source.mime_type.clone().into());
        }

        let embeddings = self.embed_chunks(&mut chunks).await?;
        self.store.replace_source(&source, &chunks).await?;

        Ok(FileOutcome::Processed {
            chunks: chunks.len(),
            embeddings,
        })
    }

    /// Attach an embedding to every chunk. Returns how many were attached.
    async fn embed_chunks(&self, chunks: &mut [Chunk]) -> KnowledgeResult<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = if self.embedder.supports_batching() {
            self.embed_batch(&texts).await?
        } else {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in &texts {
                vectors.extend(self.embed_batch(std::slice::from_ref(text)).await?);
            }
            vectors
        };

        if vectors.len() != chunks.len() {
            return Err(KnowledgeError::Embedding(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        let dims = self.embedder.dims();
        let model = self.embedder.model_name().to_string();
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            if dims > 0 && vector.len() != dims {
                return Err(KnowledgeError::DimensionMismatch {
                    expected: dims,
                    actual: vector.len(),
                });
            }
            chunk.embedding = Some(vector);
            chunk.embedding_model = Some(model.clone());
        }
        Ok(chunks.len())
    }

    async fn embed_batch(&self, texts: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        self.embedder
            .embed(texts)
            .await
            .map_err(|e| KnowledgeError::Embedding(format!("{:#}", e)))
    }

    fn collect_files(&self, dir: &Path, recursive: bool) -> KnowledgeResult<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(KnowledgeError::index(dir, "not a directory"));
        }

        let mut walker = WalkDir::new(dir).follow_links(self.follow_symlinks);
        if !recursive {
            walker = walker.max_depth(1);
        }

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(dir).unwrap_or(path);
            if self.excludes.is_match(relative) || !self.loader.is_supported(path) {
                continue;
            }
            files.push(path.to_path_buf());
        }

        files.sort();
        Ok(files)
    }
}

fn build_excludes(extra: &[String]) -> KnowledgeResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    let patterns = DEFAULT_EXCLUDE_GLOBS
        .iter()
        .copied()
        .chain(extra.iter().map(String::as_str));
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            KnowledgeError::Validation(format!("invalid exclude glob '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| KnowledgeError::Validation(format!("invalid exclude globs: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkerConfig;
    use crate::embedding::HashingEmbedder;
    use crate::store::MemoryStore;
    use std::fs;
    use tempfile::TempDir;

    fn indexer() -> Indexer {
        Indexer::new(
            Arc::new(MemoryStore::new()),
            Arc::new(HashingEmbedder::new(32).unwrap()),
            Chunker::new(ChunkerConfig::default()).unwrap(),
            SourceLoader::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_default_excludes() {
        let set = build_excludes(&["**/*.log".to_string()]).unwrap();
        assert!(set.is_match(".git/config"));
        assert!(set.is_match("a/node_modules/x/readme.md"));
        assert!(set.is_match("logs/app.log"));
        assert!(!set.is_match("docs/readme.md"));
        assert!(build_excludes(&["[".to_string()]).unwrap_err().is_validation());
    }

    #[test]
    fn test_collect_files_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.txt"), "b").unwrap();
        fs::write(tmp.path().join("a.md"), "a").unwrap();
        fs::write(tmp.path().join("image.png"), [0u8]).unwrap();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/c.txt"), "c").unwrap();
        fs::create_dir_all(tmp.path().join("node_modules/pkg")).unwrap();
        fs::write(tmp.path().join("node_modules/pkg/d.md"), "d").unwrap();

        let idx = indexer();
        let names = |files: Vec<PathBuf>| -> Vec<String> {
            files
                .iter()
                .map(|p| p.strip_prefix(tmp.path()).unwrap().display().to_string())
                .collect()
        };

        let all = idx.collect_files(tmp.path(), true).unwrap();
        assert_eq!(names(all), vec!["a.md", "b.txt", "sub/c.txt"]);

        let top = idx.collect_files(tmp.path(), false).unwrap();
        assert_eq!(names(top), vec!["a.md", "b.txt"]);
    }

    #[tokio::test]
    async fn test_chunks_carry_mime_and_model() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.md");
        fs::write(&path, "Some markdown notes.").unwrap();

        let idx = indexer();
        let summary = idx.index_files(&[&path], false).await;
        assert_eq!(summary.processed_files, 1);
        assert_eq!(summary.total_embeddings, 1);

        let source_id = source_id_for_path(&absolute_path(&path).unwrap());
        let chunks = idx.store().get_source_chunks(&source_id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata[META_MIME_TYPE], "text/markdown");
        assert_eq!(chunks[0].embedding_model.as_deref(), Some("hashing-32"));
    }

    #[tokio::test]
    async fn test_empty_file_indexed_without_chunks() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.txt");
        fs::write(&path, "   \n\n  ").unwrap();

        let idx = indexer();
        let summary = idx.index_files(&[&path], false).await;
        assert_eq!(summary.processed_files, 1);
        assert_eq!(summary.total_chunks, 0);

        let stats = idx.get_index_stats().await.unwrap();
        assert_eq!(stats.store.total_sources, 1);
        assert_eq!(stats.store.total_chunks, 0);
        assert_eq!(stats.embedding_dims, 32);
    }

    #[tokio::test]
    async fn test_remove_source_by_path_and_id() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        fs::write(&a, "first file").unwrap();
        fs::write(&b, "second file").unwrap();

        let idx = indexer();
        idx.index_files(&[&a, &b], false).await;

        assert!(idx.remove_source(a.to_str().unwrap()).await.unwrap());
        assert!(!idx.remove_source(a.to_str().unwrap()).await.unwrap());

        let b_id = source_id_for_path(&absolute_path(&b).unwrap());
        assert!(idx.remove_source(&b_id).await.unwrap());
        assert_eq!(idx.get_index_stats().await.unwrap().store.total_sources, 0);
    }

    #[tokio::test]
    async fn test_reindex_without_paths_revisits_known_sources() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        fs::write(&a, "alpha").unwrap();
        fs::write(&b, "beta").unwrap();

        let idx = indexer();
        idx.index_files(&[&a, &b], false).await;

        fs::write(&a, "alpha changed").unwrap();
        fs::remove_file(&b).unwrap();

        let summary = idx.reindex_changed_files::<PathBuf>(&[]).await.unwrap();
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.processed_files, 1);
        assert_eq!(summary.error_files, 1);
    }
}
