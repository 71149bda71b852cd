//! # Recursive character splitter
//!
//! Splits a passage into ordered, overlapping chunks of at most `chunk_size`
//! characters. Boundaries prefer natural separators, tried in order: blank line,
//! newline, space, and finally individual characters (a hard split).
//!
//! The algorithm:
//! 1. Pick the first separator that occurs in the text.
//! 2. Split on it, keeping the separator attached to the start of the following piece.
//! 3. Pieces shorter than `chunk_size` are greedily merged into chunks; when a chunk is
//!    emitted, pieces are dropped from its front until at most `chunk_overlap`
//!    characters remain, and those carry over into the next chunk.
//! 4. Pieces that are still too long are split recursively with the remaining separators.
//!
//! Emitted chunks are whitespace-trimmed and never empty. Order always follows the source.

use std::collections::VecDeque;

use tracing::warn;

const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Character-window splitter with overlap.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

impl TextSplitter {
    /// Create a splitter with the default separator ladder.
    ///
    /// `chunk_overlap` is clamped below `chunk_size`; a zero `chunk_size` is treated as 1.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the separator ladder. An empty string in the ladder means "split into characters".
    pub fn with_separators<I, S>(mut self, separators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.separators = separators.into_iter().map(Into::into).collect();
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into ordered chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut final_chunks = Vec::new();

        let mut separator = separators.last().cloned().unwrap_or_default();
        let mut remaining: &[String] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = String::new();
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate.clone();
                remaining = &separators[i + 1..];
                break;
            }
        }

        let splits = split_keeping_separator(text, &separator);

        // Separators stay attached to the pieces, so merging joins with "".
        let mut good_splits: Vec<String> = Vec::new();
        for piece in splits {
            if char_len(&piece) < self.chunk_size {
                good_splits.push(piece);
                continue;
            }
            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(&good_splits));
                good_splits.clear();
            }
            if remaining.is_empty() {
                let piece = piece.trim();
                if !piece.is_empty() {
                    final_chunks.push(piece.to_string());
                }
            } else {
                final_chunks.extend(self.split_recursive(&piece, remaining));
            }
        }
        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits));
        }

        final_chunks
    }

    fn merge_splits(&self, splits: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in splits {
            let len = char_len(piece);
            if total + len > self.chunk_size {
                if total > self.chunk_size {
                    warn!(
                        "Created a chunk of size {}, which is longer than the specified {}",
                        total, self.chunk_size
                    );
                }
                if !current.is_empty() {
                    if let Some(doc) = join_chunk(&current) {
                        docs.push(doc);
                    }
                    while total > self.chunk_overlap
                        || (total + len > self.chunk_size && total > 0)
                    {
                        match current.pop_front() {
                            Some(front) => total -= char_len(front),
                            None => break,
                        }
                    }
                }
            }
            current.push_back(piece);
            total += len;
        }

        if let Some(doc) = join_chunk(&current) {
            docs.push(doc);
        }
        docs
    }
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(400, 100)
    }
}

fn join_chunk(pieces: &VecDeque<&str>) -> Option<String> {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split on `separator`, attaching each separator to the start of the piece after it.
/// An empty separator splits into single characters. Empty pieces are dropped.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = Vec::new();
    let mut parts = text.split(separator);
    if let Some(first) = parts.next() {
        pieces.push(first.to_string());
    }
    for part in parts {
        pieces.push(format!("{separator}{part}"));
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}
