//! # Knowledge Index
//!
//! A local semantic index over document files. Files are loaded, split into
//! overlapping chunks, embedded, and stored with their vectors so that
//! natural-language queries return the most similar passages.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────┐   ┌─────────────┐
//! │   Loader   │──▶│  Chunk + Embed   │──▶│ VectorStore │
//! │ txt/md/pdf │   │    (Indexer)     │   │ SQLite/mem  │
//! └────────────┘   └──────────────────┘   └──────┬──────┘
//!                                               │
//!                                        ┌──────▼──────┐
//!                                        │ SearchEngine│
//!                                        └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kidx init                         # create the database
//! kidx index ./docs                 # index a directory
//! kidx search "deployment rollback" --context 200
//! kidx stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`loader`] | File reading, hashing, source ids |
//! | [`extract`] | Text extraction for PDF and DOCX |
//! | [`chunk`] | Overlapping, boundary-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store trait, SQLite and in-memory backends |
//! | [`index`] | Indexing pipeline |
//! | [`search`] | Semantic search and context expansion |
//! | [`stats`] | Human-readable reports |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod search;
pub mod stats;
pub mod store;

pub use error::{KnowledgeError, KnowledgeResult};
pub use index::Indexer;
pub use search::{SearchEngine, SearchOptions};
pub use store::{MemoryStore, SqliteStore, VectorStore};
