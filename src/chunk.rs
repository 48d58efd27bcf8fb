//! Paragraph-boundary text chunker.
//!
//! Splits document body text into [`Chunk`]s that respect a configurable
//! `max_tokens` limit. Splitting occurs on paragraph boundaries (`\n\n`);
//! a paragraph longer than the limit is hard-split, preferring sentence
//! ends, then line breaks, then spaces.
//!
//! With `overlap_tokens > 0`, every chunk after the first starts with the
//! tail of the previous chunk, cut on a word boundary. Article paragraphs
//! and sanctions are short, so most documents yield a single chunk.
//!
//! Each chunk receives a fresh UUID plus a SHA-256 hash of its text for
//! staleness detection.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks on paragraph boundaries, respecting max_tokens.
/// Returns chunks with contiguous indices starting at 0.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(CHARS_PER_TOKEN);
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    let pieces = split_pieces(text, max_chars);
    if pieces.is_empty() {
        return vec![make_chunk(document_id, 0, text.trim())];
    }

    let mut chunks = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.iter().enumerate() {
        let text = match i.checked_sub(1).map(|prev| tail(&pieces[prev], overlap_chars)) {
            Some(prefix) if !prefix.is_empty() => format!("{} {}", prefix, piece),
            _ => piece.clone(),
        };
        chunks.push(make_chunk(document_id, i as i64, &text));
    }
    chunks
}

/// Packs paragraphs into pieces of at most `max_chars` bytes.
fn split_pieces(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }
    pieces
}

fn hard_split(paragraph: &str, max_chars: usize, pieces: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        let split_at = if remaining.len() > max_chars {
            let limit = floor_char_boundary(remaining, max_chars);
            let window = &remaining[..limit];
            let boundary = [". ", "! ", "? ", "; "]
                .iter()
                .filter_map(|end| window.rfind(end).map(|pos| pos + 1))
                .max()
                .or_else(|| window.rfind('\n').map(|pos| pos + 1))
                .or_else(|| window.rfind(' ').map(|pos| pos + 1))
                .unwrap_or(limit);
            if boundary == 0 {
                next_char_boundary(remaining, 0)
            } else {
                boundary
            }
        } else {
            remaining.len()
        };

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

/// Last `max_chars` bytes of `text`, starting at a word boundary.
fn tail(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    if text.len() <= max_chars {
        return text.trim();
    }

    let mut start = text.len() - max_chars;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    let candidate = &text[start..];
    let preceded_by_space = text[..start].ends_with(char::is_whitespace);
    if preceded_by_space {
        return candidate.trim();
    }
    match candidate.find(char::is_whitespace) {
        Some(pos) => candidate[pos..].trim(),
        None => "",
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index + 1;
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i.min(text.len())
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
