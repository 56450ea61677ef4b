//! TOML configuration.
//!
//! Every section is optional; missing keys fall back to the defaults below, so
//! `Config::default()` works for library callers and an empty file is a valid
//! config for the CLI.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::ChunkerConfig;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::loader::DEFAULT_MAX_FILE_SIZE;

/// Embedding providers understood by [`crate::embedding::create_embedder`].
pub const EMBEDDING_PROVIDERS: &[&str] = &["disabled", "openai", "ollama", "hashing"];

/// Store backends understood by [`crate::store::SqliteStore::from_config`].
pub const STORE_BACKENDS: &[&str] = &["brute-force", "sqlite-vec"];

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkerConfig,
    pub loader: LoaderConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/kidx.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Extra globs skipped during directory walks, on top of the built-in ones.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            follow_symlinks: false,
            exclude_globs: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub similarity_threshold: f32,
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: 0.0,
            overfetch_factor: default_overfetch_factor(),
            context_chars: default_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_overfetch_factor() -> usize {
    2
}
fn default_context_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Ollama base URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Offline feature-hashing embedder with the given dimensionality.
    pub fn hashing(dims: usize) -> Self {
        Self {
            provider: "hashing".to_string(),
            model: Some(format!("hashing-{}", dims)),
            dims: Some(dims),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

fn default_backend() -> String {
    "brute-force".to_string()
}

impl Config {
    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> KnowledgeResult<()> {
        self.chunking.validate()?;

        if self.retrieval.top_k < 1 {
            return Err(invalid("retrieval.top_k must be >= 1"));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.similarity_threshold) {
            return Err(invalid("retrieval.similarity_threshold must be in [-1.0, 1.0]"));
        }
        if self.retrieval.overfetch_factor < 1 {
            return Err(invalid("retrieval.overfetch_factor must be >= 1"));
        }
        if self.loader.max_file_size == 0 {
            return Err(invalid("loader.max_file_size must be > 0"));
        }

        let provider = self.embedding.provider.as_str();
        if !EMBEDDING_PROVIDERS.contains(&provider) {
            return Err(invalid(format!(
                "unknown embedding provider: '{}'. Must be one of: {}",
                provider,
                EMBEDDING_PROVIDERS.join(", ")
            )));
        }
        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                return Err(invalid(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    provider
                )));
            }
            if self.embedding.model.is_none() {
                return Err(invalid(format!(
                    "embedding.model must be specified when provider is '{}'",
                    provider
                )));
            }
        }

        if !STORE_BACKENDS.contains(&self.store.backend.as_str()) {
            return Err(invalid(format!(
                "unknown store backend: '{}'. Must be one of: {}",
                self.store.backend,
                STORE_BACKENDS.join(", ")
            )));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> KnowledgeError {
    KnowledgeError::Validation(message.into())
}

/// Parse a config from TOML text and validate it.
pub fn parse_config(content: &str) -> KnowledgeResult<Config> {
    let config: Config = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Read, parse and validate the config file at `path`.
pub fn load_config(path: &Path) -> KnowledgeResult<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.db.path, PathBuf::from("./data/kidx.sqlite"));
        assert_eq!(config.chunking, ChunkerConfig::default());
        assert_eq!(config.loader.max_file_size, 10 * 1024 * 1024);
        assert!(config.index.recursive);
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.retrieval.overfetch_factor, 2);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.store.backend, "brute-force");
    }

    #[test]
    fn test_partial_sections() {
        let config = parse_config(
            r#"
[chunking]
chunk_size = 400
chunk_overlap = 50

[embedding]
provider = "hashing"
model = "hashing-64"
dims = 64
"#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size, 400);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.chunking.min_chunk_size, 100);
        assert_eq!(config.embedding.dims, Some(64));
        assert_eq!(config.embedding.max_retries, 5);
    }

    #[test]
    fn test_invalid_chunking_rejected() {
        let err = parse_config("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_invalid_retrieval_rejected() {
        assert!(parse_config("[retrieval]\ntop_k = 0\n").unwrap_err().is_validation());
        assert!(parse_config("[retrieval]\nsimilarity_threshold = 1.5\n")
            .unwrap_err()
            .is_validation());
        assert!(parse_config("[retrieval]\noverfetch_factor = 0\n")
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_enabled_provider_requires_model_and_dims() {
        let err = parse_config("[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));

        let err = parse_config("[embedding]\nprovider = \"ollama\"\ndims = 768\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_unknown_provider_and_backend_rejected() {
        let err = parse_config("[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("unknown embedding provider"));

        let err = parse_config("[store]\nbackend = \"faiss\"\n").unwrap_err();
        assert!(err.to_string().contains("unknown store backend"));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = parse_config("[db\npath = 1").unwrap_err();
        assert!(matches!(err, KnowledgeError::Toml(_)));
    }
}
