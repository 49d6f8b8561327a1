//! Fixed-window text chunker with overlap.
//!
//! Splits a document's text into [`Chunk`]s of `chunk_size` units where
//! consecutive chunks share `overlap` units. A unit is either a character
//! ([`ChunkUnit::Chars`]) or a whitespace-delimited token together with the
//! whitespace that follows it ([`ChunkUnit::Tokens`]).
//!
//! # Algorithm
//!
//! 1. Compute the start position of every unit in the text.
//! 2. Window `i` covers units `[i * step, i * step + chunk_size)` where
//!    `step = chunk_size - overlap`, clipped to the end of the text.
//! 3. Stop after the first window that reaches the end.
//!
//! Chunk text is sliced from the original string. Concatenating each chunk's
//! non-overlapping prefix reproduces the document exactly.
//!
//! # Example
//!
//! ```rust
//! use hr_assistant_core::chunk::{chunk_text, ChunkingOptions};
//!
//! let text = "a".repeat(2400);
//! let chunks = chunk_text("doc", &text, &ChunkingOptions::new(1000, 200)).unwrap();
//! let spans: Vec<_> = chunks.iter().map(|c| (c.start, c.end)).collect();
//! assert_eq!(spans, vec![(0, 1000), (800, 1800), (1600, 2400)]);
//! ```

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{Chunk, Document};

/// Unit used to measure `chunk_size` and `overlap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    #[default]
    Chars,
    Tokens,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingOptions {
    pub chunk_size: usize,
    pub overlap: usize,
    pub unit: ChunkUnit,
}

impl ChunkingOptions {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
            unit: ChunkUnit::Chars,
        }
    }

    pub fn with_unit(mut self, unit: ChunkUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::config("chunk_size must be > 0"));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Split a document into chunks. See [`chunk_text`].
pub fn chunk_document(document: &Document, options: &ChunkingOptions) -> Result<Vec<Chunk>> {
    chunk_text(&document.id, &document.text, options)
}

/// Split `text` into overlapping chunks owned by `document_id`.
///
/// Chunk ids are `"{document_id}:{ordinal:05}"`, so sorting by id orders
/// chunks by document and then by position.
///
/// # Errors
///
/// [`Error::Config`] if `chunk_size == 0` or `overlap >= chunk_size`.
pub fn chunk_text(document_id: &str, text: &str, options: &ChunkingOptions) -> Result<Vec<Chunk>> {
    options.validate()?;

    let marks = unit_starts(text, options.unit);
    let total_chars = text.chars().count();
    let unit_count = marks.len();

    if unit_count == 0 {
        return Ok(vec![make_chunk(document_id, 0, "", 0, 0)]);
    }

    let bound = |unit: usize| -> (usize, usize) {
        if unit >= unit_count {
            (text.len(), total_chars)
        } else {
            marks[unit]
        }
    };

    let step = options.chunk_size - options.overlap;
    let mut chunks = Vec::new();
    let mut start_unit = 0usize;

    loop {
        let end_unit = (start_unit + options.chunk_size).min(unit_count);
        let (start_byte, start_char) = bound(start_unit);
        let (end_byte, end_char) = bound(end_unit);
        chunks.push(make_chunk(
            document_id,
            chunks.len(),
            &text[start_byte..end_byte],
            start_char,
            end_char,
        ));
        if end_unit >= unit_count {
            break;
        }
        start_unit += step;
    }

    Ok(chunks)
}

/// `(byte, char)` position where each unit begins. The first unit always
/// begins at the start of the text so no leading whitespace is lost.
fn unit_starts(text: &str, unit: ChunkUnit) -> Vec<(usize, usize)> {
    match unit {
        ChunkUnit::Chars => text
            .char_indices()
            .enumerate()
            .map(|(ci, (bi, _))| (bi, ci))
            .collect(),
        ChunkUnit::Tokens => {
            let mut marks = Vec::new();
            let mut prev_ws = true;
            for (ci, (bi, ch)) in text.char_indices().enumerate() {
                let ws = ch.is_whitespace();
                if !ws && prev_ws {
                    marks.push((bi, ci));
                }
                prev_ws = ws;
            }
            if text.is_empty() {
                return marks;
            }
            match marks.first_mut() {
                Some(first) => *first = (0, 0),
                None => marks.push((0, 0)),
            }
            marks
        }
    }
}

fn make_chunk(document_id: &str, ordinal: usize, text: &str, start: usize, end: usize) -> Chunk {
    Chunk {
        id: format!("{}:{:05}", document_id, ordinal),
        document_id: document_id.to_string(),
        ordinal,
        text: text.to_string(),
        start,
        end,
    }
}
