//! Recursive, overlap-aware text splitting for retrieval pipelines.
//!
//! Documents are cut into chunks small enough to embed while keeping related
//! text together. Splitting tries the coarsest separator first (paragraphs),
//! then falls back to finer ones (lines, spaces) only for the pieces that are
//! still too long, and finally to plain character boundaries.
//!
//! The module defines two main types:
//! - [`RecursiveTextSplitter`]: holds the separators, the target chunk size and
//!   the overlap, and produces chunks.
//! - [`TextChunk`]: one contiguous slice of the source text plus its position.
//!
//! # Guarantees
//!
//! * Every chunk is a contiguous slice of the input. Consecutive chunks either
//!   abut or overlap, so no character of the input is ever dropped.
//! * Lengths are counted in characters, and splits never land inside a UTF-8
//!   code point.
//! * A text that already fits in `chunk_size` comes back as a single chunk
//!   equal to the input, which makes re-splitting chunks a no-op.
//!
//! # Usage
//!
//! ```
//! use docqa_context::text::RecursiveTextSplitter;
//!
//! let splitter = RecursiveTextSplitter::new(40, 10).unwrap();
//! let text = "Wind power grew quickly last year.\n\nSolar capacity doubled.";
//!
//! let chunks = splitter.split_text(text);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].start_index, 0);
//! assert!(chunks.iter().all(|c| c.chunk_text.chars().count() <= 40));
//! ```
use regex::Regex;
use serde::Serialize;
use std::collections::VecDeque;
use std::ops::Range;

/// Default separators, ordered from most to least significant.
///
/// - `\n\n`: paragraph breaks
/// - `\n`: line breaks
/// - ` `: spaces
///
/// Once these are exhausted the splitter cuts at character boundaries.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " "];

/// Errors raised while configuring a [`RecursiveTextSplitter`].
#[derive(Debug, thiserror::Error)]
pub enum SplitterError {
    #[error("chunk_size must be at least 1")]
    ZeroChunkSize,

    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },

    #[error("invalid separator pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Splits text into overlapping chunks using a prioritized list of separators.
#[derive(Debug, Clone)]
pub struct RecursiveTextSplitter {
    separators: Vec<Regex>,
    chunk_size: usize,
    chunk_overlap: usize,
}

/// A contiguous slice of a source text produced by [`RecursiveTextSplitter::split_text`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    /// Position of this chunk in the output (0-indexed).
    pub sequence: usize,
    /// Character offset of the first character of this chunk in the source text.
    pub start_index: usize,
    /// The chunk content.
    pub chunk_text: String,
}

impl TextChunk {
    /// Character offset one past the last character of this chunk.
    pub fn end_index(&self) -> usize {
        self.start_index + self.chunk_text.chars().count()
    }
}

impl RecursiveTextSplitter {
    /// Creates a splitter with [`DEFAULT_SEPARATORS`].
    ///
    /// # Errors
    ///
    /// Fails if `chunk_size` is zero or `chunk_overlap` is not smaller than `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, SplitterError> {
        if chunk_size == 0 {
            return Err(SplitterError::ZeroChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(SplitterError::OverlapTooLarge {
                size: chunk_size,
                overlap: chunk_overlap,
            });
        }

        Self {
            separators: Vec::new(),
            chunk_size,
            chunk_overlap,
        }
        .with_separators(DEFAULT_SEPARATORS)
    }

    /// Replaces the separators with literal strings, most significant first.
    pub fn with_separators(self, separators: &[&str]) -> Result<Self, SplitterError> {
        let escaped: Vec<String> = separators.iter().map(|s| regex::escape(s)).collect();
        let patterns: Vec<&str> = escaped.iter().map(String::as_str).collect();
        self.with_patterns(&patterns)
    }

    /// Replaces the separators with regular expressions, most significant first.
    pub fn with_patterns(mut self, patterns: &[&str]) -> Result<Self, SplitterError> {
        self.separators = patterns
            .iter()
            .map(|&pattern| {
                Regex::new(pattern).map_err(|source| SplitterError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Splits `text` into chunks of at most `chunk_size` characters.
    ///
    /// Consecutive chunks share up to `chunk_overlap` characters of trailing
    /// context. An empty input produces no chunks.
    ///
    /// ```
    /// use docqa_context::text::RecursiveTextSplitter;
    ///
    /// let splitter = RecursiveTextSplitter::new(30, 0).unwrap();
    /// let text = (0..20).map(|_| "grid storage ").collect::<String>();
    /// let chunks = splitter.split_text(&text);
    ///
    /// // Without overlap the chunks concatenate back to the input.
    /// let rebuilt: String = chunks.iter().map(|c| c.chunk_text.as_str()).collect();
    /// assert_eq!(rebuilt, text);
    /// ```
    pub fn split_text(&self, text: &str) -> Vec<TextChunk> {
        let segments = self.split_recursively_into_segments(text, 0, 0);
        let ranges = self.merge_segments(text, &segments);

        // Ranges start in non-decreasing order, so character offsets can be
        // counted incrementally.
        let mut counted_bytes = 0;
        let mut counted_chars = 0;
        ranges
            .into_iter()
            .enumerate()
            .map(|(sequence, range)| {
                counted_chars += text[counted_bytes..range.start].chars().count();
                counted_bytes = range.start;
                TextChunk {
                    sequence,
                    start_index: counted_chars,
                    chunk_text: text[range].to_string(),
                }
            })
            .collect()
    }

    // Returns byte ranges of "atomic" segments: pieces that fit in chunk_size,
    // or the separator matches themselves. Together they tile the whole input.
    fn split_recursively_into_segments(
        &self,
        text: &str,
        separator_idx: usize,
        offset: usize,
    ) -> Vec<Range<usize>> {
        if text.is_empty() {
            return Vec::new();
        }

        if text.chars().count() <= self.chunk_size {
            return vec![offset..offset + text.len()];
        }

        // Separators exhausted: cut at character boundaries.
        if separator_idx >= self.separators.len() {
            let mut segments = Vec::new();
            let mut start = 0;
            let mut count = 0;
            for (idx, _) in text.char_indices() {
                if count == self.chunk_size {
                    segments.push(offset + start..offset + idx);
                    start = idx;
                    count = 0;
                }
                count += 1;
            }
            segments.push(offset + start..offset + text.len());
            return segments;
        }

        let separator = &self.separators[separator_idx];
        let mut segments = Vec::new();
        let mut local_start = 0;

        for mat in separator.find_iter(text) {
            if mat.start() == mat.end() {
                continue;
            }
            if mat.start() > local_start {
                segments.extend(self.split_recursively_into_segments(
                    &text[local_start..mat.start()],
                    separator_idx + 1,
                    offset + local_start,
                ));
            }
            segments.push(offset + mat.start()..offset + mat.end());
            local_start = mat.end();
        }

        if local_start < text.len() {
            segments.extend(self.split_recursively_into_segments(
                &text[local_start..],
                separator_idx + 1,
                offset + local_start,
            ));
        }

        segments
    }

    // Greedily packs segments into chunks. When a chunk is full, the trailing
    // segments that fit in chunk_overlap are carried into the next one.
    fn merge_segments(&self, text: &str, segments: &[Range<usize>]) -> Vec<Range<usize>> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<(Range<usize>, usize)> = VecDeque::new();
        let mut window_len = 0;

        for segment in segments {
            let segment_len = text[segment.clone()].chars().count();

            if window_len + segment_len > self.chunk_size && !window.is_empty() {
                chunks.push(window_span(&window));

                while let Some(&(_, front_len)) = window.front() {
                    if window_len > self.chunk_overlap
                        || window_len + segment_len > self.chunk_size
                    {
                        window_len -= front_len;
                        window.pop_front();
                    } else {
                        break;
                    }
                }
            }

            window.push_back((segment.clone(), segment_len));
            window_len += segment_len;
        }

        if !window.is_empty() {
            chunks.push(window_span(&window));
        }

        chunks
    }
}

fn window_span(window: &VecDeque<(Range<usize>, usize)>) -> Range<usize> {
    match (window.front(), window.back()) {
        (Some((first, _)), Some((last, _))) => first.start..last.end,
        _ => 0..0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_len(s: &str) -> usize {
        s.chars().count()
    }

    /// Rebuilds the source from overlapping chunks by skipping the shared prefix of each.
    fn reconstruct(chunks: &[TextChunk]) -> String {
        let mut rebuilt = String::new();
        let mut covered = 0;
        for chunk in chunks {
            assert!(
                chunk.start_index <= covered,
                "gap before chunk {}: starts at {} but only {} chars covered",
                chunk.sequence,
                chunk.start_index,
                covered
            );
            let skip = covered - chunk.start_index;
            rebuilt.extend(chunk.chunk_text.chars().skip(skip));
            covered = covered.max(chunk.end_index());
        }
        rebuilt
    }

    #[test]
    fn test_split_single_chunk() {
        let splitter = RecursiveTextSplitter::new(500, 50).unwrap();
        let text = "A short note about hydro power.";

        let chunks = splitter.split_text(text);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_text, text);
        assert_eq!(chunks[0].sequence, 0);
        assert_eq!(chunks[0].start_index, 0);
    }

    #[test]
    fn test_split_empty_content() {
        let splitter = RecursiveTextSplitter::new(500, 50).unwrap();
        assert!(splitter.split_text("").is_empty());
    }

    #[test]
    fn test_split_without_overlap_reconstructs_exactly() {
        let splitter = RecursiveTextSplitter::new(100, 0).unwrap();
        let text = (0..100)
            .map(|_| "This is a test sentence. ")
            .collect::<String>();

        let chunks = splitter.split_text(&text);

        assert!(chunks.len() >= text.len() / 100);
        assert!(chunks.len() <= text.len() / 100 + 2);
        let rebuilt: String = chunks.iter().map(|c| c.chunk_text.as_str()).collect();
        assert_eq!(rebuilt, text);
        for chunk in &chunks {
            assert!(char_len(&chunk.chunk_text) <= 100);
        }
    }

    #[test]
    fn test_split_with_overlap_covers_every_character() {
        let splitter = RecursiveTextSplitter::new(80, 20).unwrap();
        let text = (0..60)
            .map(|i| format!("turbine{i} output "))
            .collect::<String>();

        let chunks = splitter.split_text(&text);

        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
        assert_eq!(chunks.last().unwrap().end_index(), char_len(&text));

        let mut saw_overlap = false;
        for pair in chunks.windows(2) {
            let overlap = pair[0].end_index().saturating_sub(pair[1].start_index);
            assert!(overlap <= 20, "overlap {overlap} exceeds configured 20");
            saw_overlap |= overlap > 0;
        }
        assert!(saw_overlap, "expected consecutive chunks to share context");
    }

    #[test]
    fn test_split_prefers_paragraph_boundaries() {
        let splitter = RecursiveTextSplitter::new(60, 0).unwrap();
        let first = "Coal plants are being retired across the region.";
        let second = "Gas turbines cover most of the evening peak demand.";
        let text = format!("{first}\n\n{second}");

        let chunks = splitter.split_text(&text);

        assert_eq!(chunks[0].chunk_text, format!("{first}\n\n"));
        assert_eq!(chunks.last().unwrap().chunk_text, second);
    }

    #[test]
    fn test_split_multibyte_text_on_char_boundaries() {
        let splitter = RecursiveTextSplitter::new(7, 2).unwrap();
        let text = "风能和太阳能是增长最快的可再生能源之一，储能技术也在快速发展";

        let chunks = splitter.split_text(text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(&chunk.chunk_text) <= 7);
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_resplit_is_identity() {
        let splitter = RecursiveTextSplitter::new(120, 30).unwrap();
        let text = (0..40)
            .map(|i| format!("Line {i} about grid frequency.\n"))
            .collect::<String>();

        for chunk in splitter.split_text(&text) {
            let again = splitter.split_text(&chunk.chunk_text);
            assert_eq!(again.len(), 1);
            assert_eq!(again[0].chunk_text, chunk.chunk_text);
        }
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(matches!(
            RecursiveTextSplitter::new(0, 0),
            Err(SplitterError::ZeroChunkSize)
        ));
        assert!(matches!(
            RecursiveTextSplitter::new(100, 100),
            Err(SplitterError::OverlapTooLarge {
                size: 100,
                overlap: 100
            })
        ));
        let bad = RecursiveTextSplitter::new(100, 10)
            .unwrap()
            .with_patterns(&["("]);
        assert!(matches!(bad, Err(SplitterError::InvalidPattern { .. })));
    }

    #[test]
    fn test_custom_patterns() {
        let splitter = RecursiveTextSplitter::new(30, 0)
            .unwrap()
            .with_patterns(&[r"(?m)^#+ "])
            .unwrap();
        let text = "# Wind\nOffshore farms expand.\n# Solar\nRooftop panels spread.";

        let chunks = splitter.split_text(text);

        let rebuilt: String = chunks.iter().map(|c| c.chunk_text.as_str()).collect();
        assert_eq!(rebuilt, text);
        assert!(chunks.iter().any(|c| c.chunk_text.contains("Offshore")));
    }
}
