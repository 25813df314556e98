//! Boundary-preserving text segmenter.
//!
//! Splits a raw source text into [`Segment`]s that respect a configurable
//! character budget. Splitting occurs on paragraph boundaries (`\n\n`) to
//! preserve narrative coherence; paragraphs that exceed the budget on their
//! own are split on sentence boundaries instead.
//!
//! Segments are contiguous slices of the input: concatenating them in order
//! reconstructs the original text byte-for-byte. Nothing is trimmed or
//! dropped — a single sentence larger than the budget is emitted as an
//! oversized segment rather than truncated, because the downstream episode
//! extractor must never lose source text.
//!
//! # Algorithm
//!
//! 1. Split the text into lossless units: paragraphs (separator attached),
//!    or sentences for paragraphs over the budget.
//! 2. Accumulate units into a buffer until adding the next unit would
//!    exceed `max_chars`, then flush the buffer as a segment.
//! 3. A unit that exceeds `max_chars` by itself becomes its own segment.
//!
//! Deterministic: the same input and budget always yield the same segment
//! boundaries. The full segment list is materialized before extraction runs.

/// A contiguous slice of the source text, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Zero-based position within the source.
    pub index: usize,
    pub text: String,
}

/// Split `text` into segments of at most `max_chars` characters where
/// boundaries permit.
///
/// # Guarantees
///
/// - Segment indices are contiguous: `0, 1, 2, …, N-1`.
/// - Concatenating all segment texts reconstructs `text` exactly.
/// - Only units that are individually larger than `max_chars` (a single
///   unbreakable sentence) produce segments over the budget.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<Segment> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut segments: Vec<Segment> = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for unit in split_units(text, max_chars) {
        let unit_chars = unit.chars().count();
        if buf_chars > 0 && buf_chars + unit_chars > max_chars {
            segments.push(Segment {
                index: segments.len(),
                text: std::mem::take(&mut buf),
            });
            buf_chars = 0;
        }
        buf.push_str(unit);
        buf_chars += unit_chars;
    }

    if !buf.is_empty() {
        segments.push(Segment {
            index: segments.len(),
            text: buf,
        });
    }

    segments
}

/// Lossless unit splitter: paragraphs with their separators attached, or
/// sentences for paragraphs that exceed the budget on their own.
fn split_units(text: &str, max_chars: usize) -> Vec<&str> {
    let mut units = Vec::new();
    for para in text.split_inclusive("\n\n") {
        if para.chars().count() <= max_chars {
            units.push(para);
        } else {
            units.extend(split_sentences(para));
        }
    }
    units
}

/// Split after sentence-ending punctuation (including the Devanagari danda
/// and double danda) followed by whitespace, or after a newline. Lossless:
/// the pieces concatenate back to `s`.
fn split_sentences(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut iter = s.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        let is_break = match c {
            '\n' => true,
            '.' | '!' | '?' | '।' | '॥' => match iter.peek() {
                None => true,
                Some((_, next)) => next.is_whitespace(),
            },
            _ => false,
        };
        if is_break {
            let end = i + c.len_utf8();
            out.push(&s[start..end]);
            start = end;
        }
    }

    if start < s.len() {
        out.push(&s[start..]);
    }
    out
}
