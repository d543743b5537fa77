//! Text transforms applied after extraction
//!
//! A post-processor rewrites text and reports, through an [`OffsetMap`], where
//! every byte offset of the input ended up, so that index positions computed
//! before the transform stay correct afterwards.

use crate::{offset::OffsetMap, types::ProcessingStats};

/// Output of a post-processing step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub text: String,
    pub offsets: OffsetMap,
    pub stats: ProcessingStats,
}

impl Processed {
    /// The input returned unchanged
    pub fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            offsets: OffsetMap::identity(),
            stats: ProcessingStats::default(),
        }
    }
}

/// A pluggable text transform
///
/// Implementations must be deterministic and must only ever shorten or
/// rewrite the text in ways that `offsets` describes.
pub trait PostProcessor: Send + Sync {
    /// A short name used in log messages
    fn name(&self) -> &str;

    fn process(&self, text: &str) -> Processed;
}

/// Removes lines that are empty or contain only whitespace
///
/// A removed line takes its terminating newline with it, so paragraphs that
/// were separated by a blank line end up on consecutive lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlankLineRemover;

impl PostProcessor for BlankLineRemover {
    fn name(&self) -> &str {
        "remove-blank-lines"
    }

    fn process(&self, text: &str) -> Processed {
        let mut output = String::with_capacity(text.len());
        let mut offsets = OffsetMap::default();
        let mut stats = ProcessingStats::default();

        let mut start = 0;
        while start < text.len() {
            let (end, next) = match text[start..].find('\n') {
                Some(position) => (start + position, start + position + 1),
                None => (text.len(), text.len()),
            };

            if text[start..end].trim().is_empty() {
                offsets.delete(start, next);
                stats.lines_removed += 1;
                stats.bytes_removed += next - start;
            } else {
                output.push_str(&text[start..next]);
            }

            start = next;
        }

        Processed {
            text: output,
            offsets,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        postprocess::{BlankLineRemover, PostProcessor, Processed},
        types::ProcessingStats,
    };

    #[test]
    fn test_remove_blank_lines() {
        let text = "one\n\ntwo\n  \t\nthree";
        let processed = BlankLineRemover.process(text);

        assert_eq!(processed.text, "one\ntwo\nthree");
        assert_eq!(
            processed.stats,
            ProcessingStats {
                lines_removed: 2,
                bytes_removed: 5,
            }
        );

        // "three" starts at 13 in the input and at 8 in the output
        assert_eq!(processed.offsets.map(13), 8);
        assert_eq!(processed.offsets.map(5), 4);
        assert!(!processed.offsets.is_identity());
        assert_eq!(processed.offsets.total_shift(), -5);
    }

    /// A trailing newline does not count as a blank line
    #[test]
    fn test_trailing_newline_is_kept() {
        let processed = BlankLineRemover.process("one\ntwo\n");
        assert_eq!(processed, Processed::unchanged("one\ntwo\n"));
        assert!(processed.offsets.is_identity());
        assert_eq!(processed.offsets.total_shift(), 0);
    }

    #[test]
    fn test_whitespace_only_text() {
        let processed = BlankLineRemover.process("\n \n");
        assert_eq!(processed.text, "");
        assert_eq!(processed.stats.lines_removed, 2);
        assert_eq!(processed.stats.bytes_removed, 3);
    }
}
