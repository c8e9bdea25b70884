//! Text chunking with structure awareness
//!
//! Splits cleaned markdown into overlapping, size-bounded chunks while
//! preferring natural boundaries: paragraph breaks first, then line breaks,
//! then sentence ends, then word boundaries. A small overrun is allowed
//! rather than breaking mid-word.

/// Chunking parameters
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Maximum characters per chunk
    pub max_size: usize,

    /// Trailing characters of each chunk repeated at the start of the next
    pub overlap: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_size: 512,
            overlap: 50,
        }
    }
}

/// Rough token estimate used for `chunks.token_count` (~4 chars per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Split `content` into chunks of at most `max_size` characters with
/// `overlap` characters shared between successive chunks.
///
/// Empty or whitespace-only input yields an empty vector. Output chunks are
/// trimmed and never empty.
pub fn chunk_text(content: &str, opts: &ChunkOptions) -> Vec<String> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    // An overlap approaching the chunk size would stop the window from
    // advancing; cap it at half.
    let overlap = opts.overlap.min(opts.max_size / 2);

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < content.len() {
        start = floor_char_boundary(content, start);
        let remaining = &content[start..];

        if remaining.len() <= opts.max_size {
            push_trimmed(&mut chunks, remaining);
            break;
        }

        let end = start + best_split(remaining, opts.max_size);
        push_trimmed(&mut chunks, &content[start..end]);

        if end >= content.len() {
            break;
        }
        start = if end > start + overlap {
            floor_char_boundary(content, end - overlap)
        } else {
            end
        };
    }

    chunks
}

/// Pick a split offset within `text` close to `max_size`, preferring
/// paragraph > line > sentence > word boundaries inside the last 40% of the
/// window. Falls back to the first word boundary past the window, then to a
/// hard character cut.
fn best_split(text: &str, max_size: usize) -> usize {
    let window_end = floor_char_boundary(text, max_size);
    let window = &text[..window_end];
    let min_pos = max_size * 3 / 5;

    for pat in ["\n\n", "\n", ". ", "! ", "? ", " "] {
        if let Some(i) = window.rfind(pat) {
            let cut = i + pat.len();
            if cut >= min_pos {
                return cut;
            }
        }
    }

    // No boundary in the window: overrun to the next whitespace instead of
    // splitting inside a word.
    if let Some(i) = text[window_end..].find(char::is_whitespace) {
        return window_end + i + 1;
    }

    text.len()
}

fn push_trimmed(chunks: &mut Vec<String>, piece: &str) {
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn floor_char_boundary(text: &str, mut pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_chunks() {
        let opts = ChunkOptions::default();
        assert!(chunk_text("", &opts).is_empty());
        assert!(chunk_text("   \n\t  ", &opts).is_empty());
    }

    #[test]
    fn short_input_is_one_chunk() {
        let opts = ChunkOptions::default();
        let chunks = chunk_text("A short paragraph.", &opts);
        assert_eq!(chunks, vec!["A short paragraph.".to_string()]);
    }

    #[test]
    fn chunks_respect_max_size() {
        let opts = ChunkOptions {
            max_size: 100,
            overlap: 10,
        };
        let content = "The quick brown fox jumps over the lazy dog. ".repeat(30);
        let chunks = chunk_text(&content, &opts);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            // Whole-word overruns are allowed, mid-word splits are not.
            assert!(chunk.len() <= opts.max_size + 20, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let opts = ChunkOptions {
            max_size: 120,
            overlap: 0,
        };
        let content = format!("{}\n\n{}", "alpha ".repeat(15).trim(), "beta ".repeat(15).trim());
        let chunks = chunk_text(&content, &opts);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].ends_with("alpha"));
        assert!(chunks[1].starts_with("beta"));
    }

    #[test]
    fn successive_chunks_overlap() {
        let opts = ChunkOptions {
            max_size: 80,
            overlap: 20,
        };
        let content = "word ".repeat(60);
        let chunks = chunk_text(&content, &opts);

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].chars().rev().take(8).collect::<String>();
            let tail: String = tail.chars().rev().collect();
            assert!(
                pair[1].contains(tail.trim()),
                "expected overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn never_splits_mid_word() {
        let opts = ChunkOptions {
            max_size: 40,
            overlap: 0,
        };
        let content = "supercalifragilisticexpialidocious antidisestablishmentarianism pneumonoultramicroscopicsilicovolcanoconiosis floccinaucinihilipilification";
        let chunks = chunk_text(content, &opts);

        let words: Vec<&str> = content.split_whitespace().collect();
        for chunk in &chunks {
            for piece in chunk.split_whitespace() {
                assert!(words.contains(&piece), "split word: {}", piece);
            }
        }
    }

    #[test]
    fn multibyte_content_stays_on_char_boundaries() {
        let opts = ChunkOptions {
            max_size: 50,
            overlap: 10,
        };
        let content = "日本語のドキュメント ".repeat(20);
        // Must not panic on char boundaries.
        let chunks = chunk_text(&content, &opts);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
