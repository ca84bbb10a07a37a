//! Recursive character text splitter.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters,
//! trying separators from coarsest to finest (`"\n\n"`, `"\n"`, `" "`, then
//! individual characters) and carrying `chunk_overlap` characters of trailing
//! context into the next chunk.
//!
//! Lengths are counted in characters, not bytes, so Indonesian text with the
//! occasional non-ASCII symbol (`•`, `–`, emoji) never splits mid-codepoint.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::models::Chunk;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Split a document into chunks with contiguous indices starting at 0.
///
/// `metadata_json` is attached to every chunk unchanged.
pub fn chunk_document(
    source: &str,
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    metadata_json: &str,
) -> Vec<Chunk> {
    split_text(text, chunk_size, chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(source, i as i64, &piece, metadata_json))
        .collect()
}

/// Split text into overlapping pieces no longer than `chunk_size` characters.
/// Empty or whitespace-only input yields no pieces.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chunk_overlap = chunk_overlap.min(chunk_size - 1);
    split_recursive(text, &SEPARATORS, chunk_size, chunk_overlap)
}

fn split_recursive(
    text: &str,
    separators: &[&str],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    // Pick the coarsest separator present in the text
    let (pos, separator) = separators
        .iter()
        .enumerate()
        .find(|(_, s)| s.is_empty() || text.contains(**s))
        .map(|(i, s)| (i, *s))
        .unwrap_or((separators.len().saturating_sub(1), ""));
    let finer = &separators[(pos + 1).min(separators.len())..];

    let splits: Vec<String> = if separator.is_empty() {
        text.chars().map(|c| c.to_string()).collect()
    } else {
        text.split(separator)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    };

    let mut out = Vec::new();
    let mut good: Vec<String> = Vec::new();

    for split in splits {
        if char_len(&split) < chunk_size {
            good.push(split);
            continue;
        }

        if !good.is_empty() {
            out.extend(merge_splits(&good, separator, chunk_size, chunk_overlap));
            good.clear();
        }

        if finer.is_empty() {
            out.push(split);
        } else {
            out.extend(split_recursive(&split, finer, chunk_size, chunk_overlap));
        }
    }

    if !good.is_empty() {
        out.extend(merge_splits(&good, separator, chunk_size, chunk_overlap));
    }

    out
}

/// Greedily join small splits into chunks, keeping an overlap window.
fn merge_splits(
    splits: &[String],
    separator: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut docs = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for split in splits {
        let len = char_len(split);
        let joined_len = |total: usize, current: &VecDeque<&str>| {
            total + len + if current.is_empty() { 0 } else { sep_len }
        };

        if joined_len(total, &current) > chunk_size && !current.is_empty() {
            push_joined(&mut docs, &current, separator);

            // Drop leading splits until the remainder fits in the overlap
            while total > chunk_overlap
                || (joined_len(total, &current) > chunk_size && total > 0)
            {
                let Some(front) = current.pop_front() else {
                    break;
                };
                total -= char_len(front) + if current.is_empty() { 0 } else { sep_len };
            }
        }

        if !current.is_empty() {
            total += sep_len;
        }
        current.push_back(split);
        total += len;
    }

    push_joined(&mut docs, &current, separator);
    docs
}

fn push_joined(docs: &mut Vec<String>, parts: &VecDeque<&str>, separator: &str) {
    let joined = parts.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn make_chunk(source: &str, index: i64, text: &str, metadata_json: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        source: source.to_string(),
        chunk_index: index,
        text: text.to_string(),
        metadata_json: metadata_json.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_document("a.txt", "Halo, dunia!", 1000, 200, "{}");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Halo, dunia!");
        assert_eq!(chunks[0].source, "a.txt");
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(chunk_document("a.txt", "", 1000, 200, "{}").is_empty());
        assert!(chunk_document("a.txt", "  \n\n ", 1000, 200, "{}").is_empty());
    }

    #[test]
    fn test_paragraphs_merged_under_limit() {
        let text = "Paket Bromo.\n\nPaket Batu.\n\nPaket Malang.";
        let pieces = split_text(text, 1000, 200);
        assert_eq!(pieces, vec![text.to_string()]);
    }

    #[test]
    fn test_every_piece_within_size() {
        let text = (0..200)
            .map(|i| format!("Kalimat nomor {} tentang wisata.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let pieces = split_text(&text, 100, 20);
        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(char_len(p) <= 100, "piece too long: {}", char_len(p));
        }
    }

    #[test]
    fn test_overlap_carries_context() {
        let text = "satu dua tiga empat lima enam tujuh delapan sembilan sepuluh";
        let pieces = split_text(text, 20, 10);
        assert!(pieces.len() > 1);
        // Each piece after the first starts with words that ended the previous one
        for pair in pieces.windows(2) {
            let first_word = pair[1].split(' ').next().unwrap();
            assert!(pair[0].contains(first_word), "{:?}", pair);
        }
    }

    #[test]
    fn test_long_word_hard_split() {
        let text = "x".repeat(25);
        let pieces = split_text(&text, 10, 0);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn test_multibyte_characters_counted_as_chars() {
        let text = "•".repeat(30);
        let pieces = split_text(&text, 10, 0);
        assert_eq!(pieces.len(), 3);
        assert!(pieces.iter().all(|p| char_len(p) == 10));
    }

    #[test]
    fn test_indices_contiguous_and_deterministic_text() {
        let text = (0..50)
            .map(|i| format!("Paragraf nomor {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let c1 = chunk_document("doc.txt", &text, 60, 10, "{}");
        let c2 = chunk_document("doc.txt", &text, 60, 10, "{}");
        assert_eq!(c1.len(), c2.len());
        for (i, (a, b)) in c1.iter().zip(c2.iter()).enumerate() {
            assert_eq!(a.chunk_index, i as i64);
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
        }
    }
}
