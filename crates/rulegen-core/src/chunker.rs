//! Deterministic splitting of oversized payloads and ordered reassembly.
//!
//! Splitting prefers structural boundaries. A payload is first cut into
//! paragraphs (blank-line separated records), and records are packed greedily
//! into chunks of at most `max_unit_size` characters. A record that is itself
//! too large is cut at line boundaries, and only a record with no usable
//! boundary at all is cut into fixed character windows with a bounded overlap.
//!
//! Sizes are measured in `char`s so a chunk never ends inside a UTF-8 sequence.
//!
//! ## Example
//!
//! ```rust
//! use rulegen_core::Chunker;
//!
//! let chunker = Chunker::new(12, 0);
//! let chunks = chunker.split("first para\n\nsecond one\n\nthird");
//! assert_eq!(chunks.len(), 3);
//! assert_eq!(chunks[1].text, "second one");
//!
//! // Completion order does not matter; join sorts by index.
//! let outputs = vec![(2, "C".to_string()), (0, "A".to_string()), (1, "B".to_string())];
//! assert_eq!(Chunker::join(outputs, 3).unwrap(), "A\n\nB\n\nC");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::ChunkAssemblyError;
use crate::job::Chunk;

/// Boundaries tried in order before falling back to character windows.
const SEPARATORS: [&str; 2] = ["\n\n", "\n"];

/// Separator placed between chunk outputs by [`Chunker::join`].
pub const JOIN_SEPARATOR: &str = "\n\n";

/// Splits payloads into ordered chunks and reassembles chunk outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_unit_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a chunker.
    ///
    /// `max_unit_size` is clamped to at least 1 and `overlap` to strictly less
    /// than `max_unit_size`, so character windows always make progress.
    #[must_use]
    pub fn new(max_unit_size: usize, overlap: usize) -> Self {
        let max_unit_size = max_unit_size.max(1);
        Self {
            max_unit_size,
            overlap: overlap.min(max_unit_size - 1),
        }
    }

    /// Maximum chunk size in characters.
    #[must_use]
    pub const fn max_unit_size(&self) -> usize {
        self.max_unit_size
    }

    /// Overlap between consecutive character windows.
    #[must_use]
    pub const fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `input` into an ordered, non-empty sequence of chunks.
    ///
    /// Input that already fits yields a single chunk holding the input as-is.
    #[must_use]
    pub fn split(&self, input: &str) -> Vec<Chunk> {
        self.pieces(input, 0)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk { index, text })
            .collect()
    }

    /// Join chunk outputs in index order.
    ///
    /// `outputs` may arrive in any order. Every index in `0..expected` must be
    /// present exactly once.
    pub fn join(
        mut outputs: Vec<(usize, String)>,
        expected: usize,
    ) -> Result<String, ChunkAssemblyError> {
        outputs.sort_by_key(|(index, _)| *index);

        for (position, (index, _)) in outputs.iter().enumerate() {
            if *index >= expected {
                return Err(ChunkAssemblyError::OutOfRange {
                    index: *index,
                    expected,
                });
            }
            if position > 0 && outputs[position - 1].0 == *index {
                return Err(ChunkAssemblyError::Duplicate { index: *index });
            }
            if *index != position {
                return Err(ChunkAssemblyError::Missing {
                    index: position,
                    expected,
                });
            }
        }
        if outputs.len() < expected {
            return Err(ChunkAssemblyError::Missing {
                index: outputs.len(),
                expected,
            });
        }

        Ok(outputs
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join(JOIN_SEPARATOR))
    }

    fn pieces(&self, text: &str, level: usize) -> Vec<String> {
        if char_len(text) <= self.max_unit_size {
            return vec![text.to_string()];
        }

        let Some(separator) = SEPARATORS.get(level) else {
            return self.windows(text);
        };

        let records: Vec<&str> = text
            .split(separator)
            .filter(|record| !record.trim().is_empty())
            .collect();
        if records.len() <= 1 {
            return self.pieces(text, level + 1);
        }

        let separator_len = char_len(separator);
        let mut out = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;

        for record in records {
            let record_len = char_len(record);
            if record_len > self.max_unit_size {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                out.extend(self.pieces(record, level + 1));
                continue;
            }

            let joined_len = if current.is_empty() {
                record_len
            } else {
                current_len + separator_len + record_len
            };
            if joined_len > self.max_unit_size {
                out.push(std::mem::take(&mut current));
                current_len = 0;
            }

            if !current.is_empty() {
                current.push_str(separator);
                current_len += separator_len;
            }
            current.push_str(record);
            current_len += record_len;
        }

        if !current.is_empty() {
            out.push(current);
        }
        out
    }

    fn windows(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = self.max_unit_size - self.overlap;
        let mut out = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + self.max_unit_size).min(chars.len());
            out.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        out
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
