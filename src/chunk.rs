//! Newline-separated text chunker with overlap.
//!
//! Splits extracted document text into [`TextChunk`]s of at most `size`
//! characters. Adjacent chunks share up to `overlap` characters so context
//! that straddles a cut is visible from both sides.
//!
//! # Algorithm
//!
//! 1. Split the text on `\n`, keeping empty lines so that joining a run of
//!    segments with `\n` reproduces the original text exactly.
//! 2. Hard-split any single line longer than `size` into windows of `size`
//!    characters advancing by `size - overlap`.
//! 3. Greedily pack segments while the packed length stays `<= size`.
//! 4. When the next segment does not fit, emit the packed chunk and drop
//!    segments from its front until what remains is `<= overlap` characters
//!    and leaves room for the next segment. What remains opens the next chunk.
//! 5. Whitespace-only chunks are dropped; indices are assigned afterwards so
//!    they stay contiguous.
//!
//! Lengths are measured in `char`s, not bytes.
//!
//! # Example
//!
//! ```rust
//! use docqa::chunk::chunk_text;
//!
//! let chunks = chunk_text("The capital of France is Paris.", 1000, 200);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "The capital of France is Paris.");
//! ```

use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use crate::models::TextChunk;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

const SEPARATOR: char = '\n';

/// Split `text` into ordered, overlapping chunks of at most `size` characters.
///
/// Returns an empty vector for empty or whitespace-only input; callers treat
/// that as "nothing to index". Deterministic for identical inputs.
///
/// `overlap` is clamped to `size - 1` so the `overlap < size` invariant holds
/// even if a caller skips config validation.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let size = size.max(1);
    let overlap = overlap.min(size - 1);

    let mut packed: Vec<String> = Vec::new();
    let mut window: VecDeque<(String, usize)> = VecDeque::new();
    // Packed length of `window`: segment lengths plus one separator between each pair.
    let mut window_len = 0usize;

    for segment in split_segments(text, size, overlap) {
        let seg_len = segment.chars().count();

        if !window.is_empty() && window_len + 1 + seg_len > size {
            packed.push(join(&window));

            while let Some(&(_, first_len)) = window.front() {
                let fits_next = window_len + 1 + seg_len <= size;
                if window_len <= overlap && fits_next {
                    break;
                }
                window.pop_front();
                window_len -= first_len + usize::from(!window.is_empty());
            }
        }

        window_len = if window.is_empty() {
            seg_len
        } else {
            window_len + 1 + seg_len
        };
        window.push_back((segment, seg_len));
    }

    if !window.is_empty() {
        packed.push(join(&window));
    }

    packed
        .into_iter()
        .filter(|t| !t.trim().is_empty())
        .enumerate()
        .map(|(index, text)| make_chunk(index, text))
        .collect()
}

/// Split on the separator, hard-splitting lines that alone exceed `size`.
fn split_segments(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let mut segments = Vec::new();
    for line in text.split(SEPARATOR) {
        let len = line.chars().count();
        if len <= size {
            segments.push(line.to_string());
            continue;
        }

        let chars: Vec<char> = line.chars().collect();
        let step = size - overlap;
        let mut start = 0;
        loop {
            let end = (start + size).min(len);
            segments.push(chars[start..end].iter().collect());
            if end == len {
                break;
            }
            start += step;
        }
    }
    segments
}

fn join(window: &VecDeque<(String, usize)>) -> String {
    let mut out = String::new();
    for (i, (segment, _)) in window.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(segment);
    }
    out
}

fn make_chunk(index: usize, text: String) -> TextChunk {
    TextChunk {
        index,
        hash: content_hash(&text),
        text,
    }
}

/// Hex SHA-256 of a string.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_lines(n: usize) -> String {
        (0..n)
            .map(|i| format!("line {:04} of the report", i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunk_text("", 1000, 200).is_empty());
        assert!(chunk_text(" \n\n\t ", 1000, 200).is_empty());
    }

    #[test]
    fn test_short_text_is_single_identical_chunk() {
        let text = "First line.\n\nThird line after a blank.\n";
        let chunks = chunk_text(text, 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_text_exactly_size_is_single_chunk() {
        let text = "x".repeat(50);
        let chunks = chunk_text(&text, 50, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = numbered_lines(200);
        let chunks = chunk_text(&text, 120, 40);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 120, "chunk too long: {}", c.text);
        }
    }

    #[test]
    fn test_indices_contiguous() {
        let chunks = chunk_text(&numbered_lines(100), 100, 30);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_adjacent_chunks_overlap() {
        // Lines are 23 chars, so a 40 char overlap carries exactly one line forward.
        let chunks = chunk_text(&numbered_lines(60), 200, 40);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let prev_last_line = pair[0].text.rsplit('\n').next().unwrap();
            assert!(
                pair[1].text.starts_with(prev_last_line),
                "chunk {} does not continue from chunk {}",
                pair[1].index,
                pair[0].index
            );
        }
    }

    #[test]
    fn test_overlap_is_suffix_of_previous_chunk() {
        let chunks = chunk_text(&numbered_lines(80), 150, 60);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let prev: Vec<&str> = pair[0].text.split('\n').collect();
            let next: Vec<&str> = pair[1].text.split('\n').collect();
            let carried = (1..=prev.len().min(next.len()))
                .rev()
                .find(|&k| prev[prev.len() - k..] == next[..k]);
            let k = carried.expect("next chunk should open with the tail of the previous one");
            assert!(next[..k].join("\n").chars().count() <= 60);
        }
    }

    #[test]
    fn test_all_lines_covered_in_order() {
        let text = numbered_lines(70);
        let chunks = chunk_text(&text, 130, 30);
        let mut seen: Vec<&str> = Vec::new();
        for c in &chunks {
            for line in c.text.split('\n') {
                if !seen.contains(&line) {
                    seen.push(line);
                }
            }
        }
        let expected: Vec<&str> = text.split('\n').collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_long_line_is_hard_split() {
        let text = "a".repeat(250);
        let chunks = chunk_text(&text, 100, 20);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 100));
        // windows advance by size - overlap
        assert_eq!(chunks[2].text.len(), 250 - 160);
    }

    #[test]
    fn test_multibyte_text_counts_chars() {
        let text = "é".repeat(30);
        let chunks = chunk_text(&text, 30, 5);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_overlap_clamped_below_size() {
        let chunks = chunk_text(&numbered_lines(20), 30, 500);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 30));
    }

    #[test]
    fn test_deterministic() {
        let text = numbered_lines(90);
        let c1 = chunk_text(&text, 110, 35);
        let c2 = chunk_text(&text, 110, 35);
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_rechunking_a_chunk_is_stable() {
        let chunks = chunk_text(&numbered_lines(90), 110, 35);
        for c in &chunks {
            let again = chunk_text(&c.text, 110, 35);
            assert_eq!(again.len(), 1);
            assert_eq!(again[0].text, c.text);
        }
    }

    #[test]
    fn test_hash_is_sha256_of_text() {
        let chunks = chunk_text("hello", 10, 2);
        assert_eq!(
            chunks[0].hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
