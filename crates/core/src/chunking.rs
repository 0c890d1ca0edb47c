use crate::config::RagConfig;
use crate::models::{Chunk, PageText};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub separators: Vec<String>,
}

impl From<&RagConfig> for ChunkingConfig {
    fn from(value: &RagConfig) -> Self {
        Self {
            max_chars: value.chunk_size,
            overlap_chars: value.chunk_overlap,
            separators: value.separators.clone(),
        }
    }
}

/// Splits every page into overlapping chunks, numbering them in document
/// order. Pages without text produce no chunks.
pub fn chunk_pages(pages: &[PageText], source_id: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for page in pages {
        let mut search_from = 0usize;
        let mut previous_len = 0usize;

        for piece in split_text(&page.text, config) {
            let offset = (search_from + previous_len).saturating_sub(config.overlap_chars);
            let start_offset = find_from(&page.text, &piece, offset)
                .or_else(|| find_from(&page.text, &piece, 0))
                .unwrap_or(search_from);
            search_from = start_offset;
            previous_len = char_len(&piece);

            chunks.push(Chunk {
                chunk_index: chunks.len(),
                text: piece,
                page_number: page.number,
                source_id: source_id.to_string(),
                start_offset,
            });
        }
    }

    chunks
}

/// Recursive separator split: the first separator present in the text is used,
/// pieces still larger than `max_chars` are split again with the remaining
/// separators, and an exhausted list falls back to single characters.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    split_recursive(text, &config.separators, config)
}

fn split_recursive(text: &str, separators: &[String], config: &ChunkingConfig) -> Vec<String> {
    let (separator, remaining) = pick_separator(text, separators);
    let mut chunks = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();

    for piece in split_keeping_separator(text, separator) {
        if char_len(piece) < config.max_chars {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            chunks.extend(merge_pieces(&fitting, config));
            fitting.clear();
        }

        if remaining.is_empty() && separator.is_empty() {
            // a single character wider than the limit cannot be split further
            if let Some(piece) = trimmed(piece) {
                chunks.push(piece);
            }
        } else {
            chunks.extend(split_recursive(piece, remaining, config));
        }
    }

    if !fitting.is_empty() {
        chunks.extend(merge_pieces(&fitting, config));
    }

    chunks
}

fn pick_separator<'a>(text: &str, separators: &'a [String]) -> (&'a str, &'a [String]) {
    for (position, separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            return ("", &[]);
        }
        if text.contains(separator.as_str()) {
            return (separator.as_str(), &separators[position + 1..]);
        }
    }
    ("", &[])
}

/// Splits on `separator`, attaching each separator to the piece that follows it.
fn split_keeping_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(start, ch)| &text[start..start + ch.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut cursor = 0;
    for (start, _) in text.match_indices(separator) {
        if start > cursor {
            pieces.push(&text[cursor..start]);
        }
        cursor = start;
    }
    if cursor < text.len() {
        pieces.push(&text[cursor..]);
    }
    pieces
}

/// Greedily packs pieces into chunks of at most `max_chars`, carrying up to
/// `overlap_chars` of trailing pieces into the next chunk.
fn merge_pieces(pieces: &[&str], config: &ChunkingConfig) -> Vec<String> {
    let mut merged = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);

        if total + len > config.max_chars && !window.is_empty() {
            if let Some(chunk) = join_window(&window) {
                merged.push(chunk);
            }

            while total > config.overlap_chars || (total > 0 && total + len > config.max_chars) {
                match window.pop_front() {
                    Some((_, dropped)) => total -= dropped,
                    None => break,
                }
            }
        }

        window.push_back((piece, len));
        total += len;
    }

    if let Some(chunk) = join_window(&window) {
        merged.push(chunk);
    }

    merged
}

fn join_window(window: &VecDeque<(&str, usize)>) -> Option<String> {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    trimmed(&joined)
}

fn trimmed(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Character offset of `needle` in `haystack`, searching from character `from`.
fn find_from(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let byte_from = haystack
        .char_indices()
        .nth(from)
        .map(|(byte, _)| byte)
        .unwrap_or(haystack.len());
    haystack[byte_from..]
        .find(needle)
        .map(|found| from + char_len(&haystack[byte_from..byte_from + found]))
}
