//! Human-readable index reports for `kidx stats` and `kidx sources`.
//!
//! Rendering returns a `String` so the CLI can print it and tests can
//! inspect it.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{IndexStats, Source};

pub fn render_stats(stats: &IndexStats) -> String {
    let store = &stats.store;
    let mut out = String::new();

    let _ = writeln!(out, "Knowledge Index Stats");
    let _ = writeln!(out, "=====================");
    let _ = writeln!(out);
    if let Some(path) = &store.database_path {
        let _ = writeln!(out, "  Database:    {}", path.display());
    }
    if let Some(size) = store.database_size_bytes {
        let _ = writeln!(out, "  Size:        {}", format_bytes(size));
    }
    let _ = writeln!(
        out,
        "  Backend:     {}{}",
        store.backend,
        if store.accelerated { " (accelerated)" } else { "" }
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "  Sources:     {}", store.total_sources);
    let _ = writeln!(out, "  Chunks:      {}", store.total_chunks);
    let _ = writeln!(
        out,
        "  Embedded:    {} / {} ({}%)",
        store.total_embeddings,
        store.total_chunks,
        if store.total_chunks > 0 {
            store.total_embeddings * 100 / store.total_chunks
        } else {
            0
        }
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  Embedder:    {} ({} dims)",
        stats.embedding_model, stats.embedding_dims
    );
    if let (Some(model), Some(dims)) = (&store.embedding_model, store.embedding_dims) {
        let _ = writeln!(out, "  Index:       {} ({} dims)", model, dims);
    }
    let _ = writeln!(
        out,
        "  Chunking:    size {}, overlap {}, min {}",
        stats.chunk_size, stats.chunk_overlap, stats.min_chunk_size
    );
    out
}

pub fn render_sources(sources: &[Source]) -> String {
    if sources.is_empty() {
        return "No sources indexed.\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<36}  {:>9}  {:<16}  {:<14}  PATH",
        "ID", "SIZE", "TYPE", "INDEXED"
    );
    let _ = writeln!(out, "{}", "-".repeat(96));
    for s in sources {
        let _ = writeln!(
            out,
            "{:<36}  {:>9}  {:<16}  {:<14}  {}",
            s.source_id,
            format_bytes(s.file_size),
            s.mime_type,
            format_relative(s.indexed_at),
            s.path.display()
        );
    }
    out
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "3 hours ago" style timestamps; older than 30 days prints the date.
fn format_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();

    if delta < 0 {
        ts.format("%Y-%m-%d %H:%M").to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d").to_string()
    }
}
