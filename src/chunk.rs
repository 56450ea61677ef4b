//! Overlapping, boundary-aware text chunker.
//!
//! Splits a source's text into [`Chunk`]s of at most `chunk_size` characters.
//! Consecutive windows overlap by `chunk_overlap` characters, and when
//! boundary handling is enabled a window's right edge is pulled back to the
//! nearest paragraph or sentence break.
//!
//! All offsets and sizes count Unicode scalar values (`char`), never bytes,
//! so a chunk can never split a multi-byte character.
//!
//! # Algorithm
//!
//! 1. Normalize whitespace (see [`normalize_whitespace`]).
//! 2. Empty result → no chunks. Length ≤ `chunk_size` → one chunk.
//! 3. Otherwise walk windows `[start, start + chunk_size)`. For every window
//!    that does not reach the end of the text, pull the right edge back to the
//!    last paragraph break, else the last sentence break, else keep the hard
//!    cut. The edge never moves closer than `min_chunk_size` to `start`.
//! 4. The next window starts `chunk_size - chunk_overlap` after the current
//!    window's *start*.
//! 5. Windows shorter than `min_chunk_size` are dropped.
//!
//! # Example
//!
//! ```rust
//! use knowledge_index::chunk::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
//! let chunks = chunker.chunk("Hello world.\n\nSecond paragraph.", "src-1", 0);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::models::{Chunk, ChunkMetadata, META_CHAR_COUNT, META_END_LINE, META_START_LINE};

/// Chunking parameters. Sizes are in characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    pub respect_sentence_boundaries: bool,
    pub respect_paragraph_boundaries: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_size: 100,
            respect_sentence_boundaries: true,
            respect_paragraph_boundaries: true,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> KnowledgeResult<()> {
        if self.chunk_size == 0 {
            return Err(KnowledgeError::Validation(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(KnowledgeError::Validation(format!(
                "chunk_overlap ({}) must be < chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.min_chunk_size == 0 || self.min_chunk_size > self.chunk_size {
            return Err(KnowledgeError::Validation(format!(
                "min_chunk_size ({}) must be in 1..={}",
                self.min_chunk_size, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Stateless text splitter; construct once and reuse.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Validate `config` and build a chunker.
    pub fn new(config: ChunkerConfig) -> KnowledgeResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into chunks owned by `source_id`.
    ///
    /// Chunk indices start at `start_chunk_index` and increase by one in
    /// text order. Never fails: degenerate input yields best-effort output.
    pub fn chunk(&self, text: &str, source_id: &str, start_chunk_index: i64) -> Vec<Chunk> {
        let normalized = normalize_whitespace(text);
        let chars: Vec<char> = normalized.chars().collect();
        let n = chars.len();
        if n == 0 {
            return Vec::new();
        }

        let lines = LineIndex::new(&chars);
        let spans = if n <= self.config.chunk_size {
            vec![(0, n)]
        } else {
            self.window_spans(&chars)
        };

        spans
            .into_iter()
            .enumerate()
            .map(|(i, (start, end))| {
                make_chunk(source_id, start_chunk_index + i as i64, &chars, start, end, &lines)
            })
            .collect()
    }

    fn window_spans(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let n = chars.len();
        let size = self.config.chunk_size;
        let step = size - self.config.chunk_overlap;
        let mut spans = Vec::new();
        let mut start = 0;

        loop {
            let window_end = (start + size).min(n);
            let end = if window_end < n {
                self.adjust_end(chars, start, window_end)
            } else {
                window_end
            };

            if end - start >= self.config.min_chunk_size {
                spans.push((start, end));
            }
            if window_end >= n {
                break;
            }
            start += step;
        }

        if spans.is_empty() {
            spans.push((0, size.min(n)));
        }
        spans
    }

    /// Pull `window_end` back to a paragraph or sentence break, never below
    /// `start + min_chunk_size`.
    fn adjust_end(&self, chars: &[char], start: usize, window_end: usize) -> usize {
        let floor = start + self.config.min_chunk_size;

        if self.config.respect_paragraph_boundaries {
            if let Some(p) = (floor..=window_end)
                .rev()
                .find(|&p| is_paragraph_break(chars, p))
            {
                return p;
            }
        }
        if self.config.respect_sentence_boundaries {
            if let Some(p) = (floor..=window_end)
                .rev()
                .find(|&p| is_sentence_end(chars, p))
            {
                return p;
            }
        }
        window_end
    }
}

/// `true` when a blank line starts at `p`.
fn is_paragraph_break(chars: &[char], p: usize) -> bool {
    p + 1 < chars.len() && chars[p] == '\n' && chars[p + 1] == '\n'
}

/// `true` when `p` sits right after sentence-ending punctuation followed by
/// whitespace.
fn is_sentence_end(chars: &[char], p: usize) -> bool {
    p > 0
        && p < chars.len()
        && matches!(chars[p - 1], '.' | '!' | '?' | '。' | '！' | '？')
        && chars[p].is_whitespace()
}

/// Collapse horizontal whitespace runs to one space, unify line endings to
/// `\n`, squeeze blank-line runs to a single paragraph break, and trim.
pub fn normalize_whitespace(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut pending_blank = false;

    for raw_line in unified.split('\n') {
        let mut line = String::with_capacity(raw_line.len());
        let mut in_space = false;
        for c in raw_line.chars() {
            if c != '\n' && c.is_whitespace() {
                if !in_space {
                    line.push(' ');
                    in_space = true;
                }
            } else {
                line.push(c);
                in_space = false;
            }
        }
        let line = line.trim();

        if line.is_empty() {
            pending_blank = true;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if pending_blank { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        pending_blank = false;
    }

    out
}

/// Deterministic chunk id: UUIDv5 of `<source_id>:<chunk_index>`.
pub fn chunk_id_for(source_id: &str, chunk_index: i64) -> String {
    let name = format!("{}:{}", source_id, chunk_index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Positions of every `\n`, for offset → line lookups.
struct LineIndex {
    newlines: Vec<usize>,
}

impl LineIndex {
    fn new(chars: &[char]) -> Self {
        let newlines = chars
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == '\n')
            .map(|(i, _)| i)
            .collect();
        Self { newlines }
    }

    /// 1-based line containing char offset `pos`.
    fn line_of(&self, pos: usize) -> usize {
        self.newlines.partition_point(|&nl| nl < pos) + 1
    }
}

fn make_chunk(
    source_id: &str,
    index: i64,
    chars: &[char],
    start: usize,
    end: usize,
    lines: &LineIndex,
) -> Chunk {
    let text: String = chars[start..end].iter().collect();

    let mut metadata = ChunkMetadata::new();
    metadata.insert(META_START_LINE.to_string(), lines.line_of(start).into());
    metadata.insert(
        META_END_LINE.to_string(),
        lines.line_of(end.saturating_sub(1)).into(),
    );
    metadata.insert(META_CHAR_COUNT.to_string(), (end - start).into());

    Chunk {
        chunk_id: chunk_id_for(source_id, index),
        source_id: source_id.to_string(),
        text,
        chunk_index: index,
        start_char: start,
        end_char: end,
        metadata,
        embedding: None,
        embedding_model: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(
        size: usize,
        overlap: usize,
        min: usize,
        sentences: bool,
        paragraphs: bool,
    ) -> Chunker {
        Chunker::new(ChunkerConfig {
            chunk_size: size,
            chunk_overlap: overlap,
            min_chunk_size: min,
            respect_sentence_boundaries: sentences,
            respect_paragraph_boundaries: paragraphs,
        })
        .unwrap()
    }

    fn alphabet(len: usize) -> String {
        (0..len).map(|i| (b'a' + (i % 26) as u8) as char).collect()
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let bad = [
            (0, 0, 1),
            (10, 10, 5),
            (10, 12, 5),
            (10, 2, 0),
            (10, 2, 11),
        ];
        for (size, overlap, min) in bad {
            let err = Chunker::new(ChunkerConfig {
                chunk_size: size,
                chunk_overlap: overlap,
                min_chunk_size: min,
                ..ChunkerConfig::default()
            })
            .unwrap_err();
            assert!(err.is_validation(), "expected validation error for {:?}", (size, overlap, min));
        }
    }

    #[test]
    fn test_empty_and_blank_text() {
        let c = chunker(100, 10, 5, true, true);
        assert!(c.chunk("", "s", 0).is_empty());
        assert!(c.chunk("  \t\r\n\n  ", "s", 0).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let c = chunker(100, 10, 50, true, true);
        let chunks = c.chunk("Hello,   world!\r\nBye.", "s", 5);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!\nBye.");
        assert_eq!(chunks[0].chunk_index, 5);
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks[0].end_char, chunks[0].text.chars().count());
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("a  \t b\r\nc"), "a b\nc");
        assert_eq!(normalize_whitespace("p1\n \n\n\n  p2"), "p1\n\np2");
        assert_eq!(normalize_whitespace("\n\n  lead and trail  \n"), "lead and trail");
    }

    #[test]
    fn test_overlap_reconstructs_text() {
        let text = alphabet(60);
        let c = chunker(20, 5, 5, false, false);
        let chunks = c.chunk(&text, "s", 0);
        assert_eq!(chunks.len(), 4);

        let mut rebuilt = String::new();
        let mut prev_end: usize = 0;
        for chunk in &chunks {
            let skip = prev_end.saturating_sub(chunk.start_char);
            rebuilt.extend(chunk.text.chars().skip(skip));
            prev_end = chunk.end_char;
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_consecutive_windows_overlap_exactly() {
        let c = chunker(20, 5, 5, false, false);
        let chunks = c.chunk(&alphabet(100), "s", 0);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_char - pair[1].start_char, 5);
        }
    }

    #[test]
    fn test_indices_contiguous_from_offset() {
        let text = (0..40)
            .map(|i| format!("Sentence number {}.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let c = chunker(50, 10, 10, true, true);
        let chunks = c.chunk(&text, "s", 7);
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, 7 + i as i64);
            assert!(chunk.end_char > chunk.start_char);
            assert!(chunk.char_len() <= 50);
        }
        for pair in chunks.windows(2) {
            assert!(pair[1].start_char > pair[0].start_char);
        }
    }

    #[test]
    fn test_paragraph_boundary_preferred() {
        let text = "First paragraph is here.\n\nSecond paragraph follows on.\n\nThird one ends it.";
        let c = chunker(40, 5, 10, false, true);
        let chunks = c.chunk(text, "s", 0);
        assert_eq!(chunks[0].text, "First paragraph is here.");
        assert_eq!(chunks[0].end_char, 24);
    }

    #[test]
    fn test_sentence_boundary_when_no_paragraph() {
        let text = "One two three. Four five six seven eight nine ten.";
        let c = chunker(30, 0, 5, true, true);
        let chunks = c.chunk(text, "s", 0);
        assert_eq!(chunks[0].text, "One two three.");
    }

    #[test]
    fn test_pull_back_respects_min_chunk_size() {
        let text = "One two three. Four five six seven eight nine ten.";
        let c = chunker(30, 0, 20, true, true);
        let chunks = c.chunk(text, "s", 0);
        assert_eq!(chunks[0].char_len(), 30);
    }

    #[test]
    fn test_short_tail_dropped() {
        let c = chunker(20, 5, 10, false, false);
        let chunks = c.chunk(&alphabet(38), "s", 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].end_char, 35);
    }

    #[test]
    fn test_huge_word_hard_split() {
        let word = "x".repeat(250);
        let c = chunker(100, 10, 20, true, true);
        let chunks = c.chunk(&word, "s", 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].start_char, 180);
        assert_eq!(chunks[2].end_char, 250);
    }

    #[test]
    fn test_multibyte_characters_not_split() {
        let text = "日本語のテキスト。".repeat(8) + "héllo wörld, ﬁne café";
        let c = chunker(10, 2, 3, false, false);
        let chunks = c.chunk(&text, "s", 0);
        let chars: Vec<char> = normalize_whitespace(&text).chars().collect();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            let expected: String = chars[chunk.start_char..chunk.end_char].iter().collect();
            assert_eq!(chunk.text, expected);
            assert!(chunk.text.chars().count() <= 10);
        }
    }

    #[test]
    fn test_line_metadata() {
        let text = format!("{}\n{}\n{}", alphabet(15), alphabet(15), alphabet(15));
        let c = chunker(20, 0, 5, false, false);
        let chunks = c.chunk(&text, "s", 0);
        assert_eq!(chunks[0].metadata[META_START_LINE], 1);
        assert_eq!(chunks[0].metadata[META_END_LINE], 2);
        assert_eq!(chunks[1].metadata[META_START_LINE], 2);
        assert_eq!(chunks[0].metadata[META_CHAR_COUNT], 20);
    }

    #[test]
    fn test_deterministic_ids() {
        let c = chunker(20, 5, 5, false, false);
        let a = c.chunk(&alphabet(60), "src", 0);
        let b = c.chunk(&alphabet(60), "src", 0);
        let ids_a: Vec<_> = a.iter().map(|c| c.chunk_id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|c| c.chunk_id.clone()).collect();
        assert_eq!(ids_a, ids_b);
        assert_ne!(chunk_id_for("src", 0), chunk_id_for("src", 1));
        assert_ne!(chunk_id_for("src", 0), chunk_id_for("other", 0));
    }
}
