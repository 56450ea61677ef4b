//! Source record builder: turns a file path into a [`Source`] plus its text.
//!
//! Supported formats are a static extension → mime table. Text formats are
//! decoded as UTF-8 (lossy); PDF and DOCX go through [`crate::extract`].

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::extract::{self, MIME_DOCX, MIME_PDF};
use crate::models::Source;

/// Default upper bound on file size: 10 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Extension (lowercase, no dot) → mime type.
const EXTENSION_MIME_TYPES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("markdown", "text/markdown"),
    ("rst", "text/x-rst"),
    ("csv", "text/csv"),
    ("log", "text/plain"),
    ("json", "application/json"),
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    ("toml", "application/toml"),
    ("xml", "application/xml"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("rs", "text/x-rust"),
    ("py", "text/x-python"),
    ("js", "text/javascript"),
    ("ts", "text/x-typescript"),
    ("go", "text/x-go"),
    ("java", "text/x-java"),
    ("c", "text/x-c"),
    ("h", "text/x-c"),
    ("cpp", "text/x-c++"),
    ("sh", "application/x-sh"),
    ("sql", "application/sql"),
    ("pdf", MIME_PDF),
    ("docx", MIME_DOCX),
];

/// A loaded file: its metadata record and the text to chunk.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub source: Source,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct SourceLoader {
    max_file_size: u64,
}

impl Default for SourceLoader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILE_SIZE)
    }
}

impl SourceLoader {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// `true` if the path's extension is in the supported table.
    pub fn is_supported(&self, path: &Path) -> bool {
        mime_type_for(path).is_some()
    }

    /// Read `path` and build its [`Source`] record.
    ///
    /// # Errors
    ///
    /// - `Validation` for an unsupported extension or a file over the size limit.
    /// - `Io` if the file cannot be read.
    /// - `Extract` if a PDF/DOCX cannot be converted to text.
    pub fn load(&self, path: &Path) -> KnowledgeResult<LoadedSource> {
        let mime_type = mime_type_for(path).ok_or_else(|| {
            KnowledgeError::Validation(format!("unsupported file type: {}", path.display()))
        })?;

        let absolute = absolute_path(path)?;
        let file_size = std::fs::metadata(&absolute)?.len();
        if file_size > self.max_file_size {
            return Err(KnowledgeError::Validation(format!(
                "file too large: {} ({} bytes, limit {})",
                path.display(),
                file_size,
                self.max_file_size
            )));
        }

        let bytes = std::fs::read(&absolute)?;
        let text = if extract::needs_extraction(mime_type) {
            extract::extract_text(&bytes, mime_type)?
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };

        let source = Source {
            source_id: source_id_for_path(&absolute),
            path: absolute,
            file_size: bytes.len() as u64,
            mime_type: mime_type.to_string(),
            content_hash: content_hash(&bytes),
            indexed_at: Utc::now(),
        };

        Ok(LoadedSource { source, text })
    }
}

/// Look up the mime type for a path's extension (case-insensitive).
pub fn mime_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    EXTENSION_MIME_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

/// Make `path` absolute, resolving symlinks when the file exists.
pub fn absolute_path(path: &Path) -> KnowledgeResult<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(p) => Ok(p),
        Err(_) if path.is_absolute() => Ok(path.to_path_buf()),
        Err(_) => Ok(std::env::current_dir()?.join(path)),
    }
}

/// Stable source id: UUIDv5 (URL namespace) of `file://<absolute path>`.
pub fn source_id_for_path(absolute: &Path) -> String {
    let url = format!("file://{}", absolute.display());
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes()).to_string()
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
