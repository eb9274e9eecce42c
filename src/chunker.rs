//! Document chunking: paragraphs to overlapping word windows.
//!
//! Splits text on blank-line paragraph boundaries, then slides a fixed-width
//! word window with configurable overlap across paragraphs that exceed the
//! window size. Chunk ids are assigned globally in emission order and double
//! as row positions in the vector index.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One or more blank lines (allowing trailing spaces/tabs, CRLF tolerated).
static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n[ \t]*(?:\r?\n[ \t]*)+").unwrap());

/// A contiguous word window of the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Ordinal position in the chunk sequence; doubles as the row position
    /// of this chunk's vector in the index.
    pub id: usize,
    /// The chunk text as indexed.
    pub text: String,
    /// Whitespace-token count of `text`.
    pub word_count: usize,
}

/// Errors that can occur while chunking.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("Chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
}

/// Split `text` into chunks of at most `chunk_size` words.
///
/// Paragraphs (blank-line separated) with at most `chunk_size` words become
/// one chunk each, keeping the paragraph text. Longer paragraphs are cut
/// into windows of `chunk_size` words advancing by `chunk_size - overlap`,
/// so consecutive windows share `overlap` words; the final window may be
/// shorter but is always emitted.
///
/// Empty or whitespace-only input yields an empty sequence.
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, ChunkError> {
    if overlap >= chunk_size {
        // Also rejects chunk_size == 0, which would never advance.
        return Err(ChunkError::OverlapTooLarge { chunk_size, overlap });
    }
    let stride = chunk_size - overlap;

    let mut chunks = Vec::new();
    for paragraph in PARAGRAPH_BREAK.split(text) {
        let paragraph = paragraph.trim();
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        if words.len() <= chunk_size {
            chunks.push(Chunk {
                id: chunks.len(),
                text: paragraph.to_string(),
                word_count: words.len(),
            });
            continue;
        }

        let mut start = 0;
        while start < words.len() {
            let window = &words[start..(start + chunk_size).min(words.len())];
            chunks.push(Chunk {
                id: chunks.len(),
                text: window.join(" "),
                word_count: window.len(),
            });
            start += stride;
        }
    }

    Ok(chunks)
}
