//! Sliding-window text chunker with overlap.
//!
//! Splits document content into [`Chunk`]s of at most `chunk_size`
//! characters, where each chunk starts `chunk_overlap` characters before
//! the end of the previous one. Sizes are counted in `char`s, so multibyte
//! text is never split inside a code point.
//!
//! # Algorithm
//!
//! 1. Take a window of `chunk_size` characters starting at `start`.
//! 2. Unless the window reaches the end of the text, pull its end back to
//!    the last newline (or failing that, the last whitespace) inside the
//!    window, provided the shortened chunk still extends past the overlap.
//!    Otherwise cut hard at `chunk_size`.
//! 3. The next window starts at `end - chunk_overlap`.
//!
//! Dropping the first `chunk_overlap` characters of every chunk after the
//! first and concatenating reconstructs the input exactly.
//!
//! # Example
//!
//! ```rust
//! use ragchat_core::chunk::{chunk_text, ChunkingParams};
//!
//! let params = ChunkingParams::new(1000, 200).unwrap();
//! let chunks = chunk_text("doc-1", "The sky is blue.", &params);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "The sky is blue.");
//! ```

use serde::{Deserialize, Serialize};

use crate::error::RagError;
use crate::models::{sha256_hex, Chunk};

/// Window size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingParams {
    /// Validate and build chunking parameters.
    ///
    /// `chunk_size` must be positive and `chunk_overlap` strictly smaller,
    /// otherwise the window could never advance.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, RagError> {
        if chunk_size == 0 {
            return Err(RagError::Validation("chunk_size must be > 0".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::Validation(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Split `text` into overlapping chunks.
///
/// Returns an empty vector for empty input and at least one chunk for any
/// non-empty input. Chunk indices are contiguous from 0.
pub fn chunk_text(document_id: &str, text: &str, params: &ChunkingParams) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char boundary, including the end of the text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = bounds.len() - 1;

    let size = params.chunk_size.max(1);
    let overlap = params.chunk_overlap.min(size - 1);

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let hard_end = (start + size).min(total_chars);
        let end = if hard_end < total_chars {
            snap_to_break(text, &bounds, start + overlap + 1, hard_end)
        } else {
            hard_end
        };

        let piece = &text[bounds[start]..bounds[end]];
        chunks.push(make_chunk(document_id, chunks.len() as i64, piece));

        if end >= total_chars {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Find the latest char position in `min_end..=hard_end` that directly
/// follows a newline, then any whitespace. Falls back to `hard_end`.
fn snap_to_break(text: &str, bounds: &[usize], min_end: usize, hard_end: usize) -> usize {
    if min_end > hard_end {
        return hard_end;
    }
    let char_before = |pos: usize| text[bounds[pos - 1]..bounds[pos]].chars().next();

    let newline = (min_end..=hard_end)
        .rev()
        .find(|&pos| char_before(pos) == Some('\n'));
    if let Some(pos) = newline {
        return pos;
    }

    (min_end..=hard_end)
        .rev()
        .find(|&pos| char_before(pos).is_some_and(char::is_whitespace))
        .unwrap_or(hard_end)
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    Chunk {
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: sha256_hex(text),
    }
}
