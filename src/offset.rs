//! Byte offset bookkeeping
//!
//! [`Utf8Index`] converts arbitrary byte positions into positions that land on
//! a character boundary of a text. [`OffsetMap`] records the edits a text
//! transform made, so that positions measured before the transform can be
//! carried over to the transformed text.

/// Cumulative UTF-8 byte lengths of every character prefix of a text
///
/// `prefix[i]` is the byte length of the first `i` characters, so the table
/// has one more element than the text has characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utf8Index {
    prefix: Vec<usize>,
}

impl Utf8Index {
    pub fn new(text: &str) -> Self {
        let mut prefix = Vec::with_capacity(text.len() + 1);
        prefix.extend(text.char_indices().map(|(offset, _)| offset));
        prefix.push(text.len());
        Self { prefix }
    }

    /// Number of characters in the indexed text
    pub fn char_count(&self) -> usize {
        self.prefix.len() - 1
    }

    /// Byte length of the indexed text
    pub fn byte_len(&self) -> usize {
        self.prefix[self.prefix.len() - 1]
    }

    /// Byte length of the first `chars` characters
    pub fn byte_offset(&self, chars: usize) -> usize {
        self.prefix[chars.min(self.char_count())]
    }

    /// Smallest character index whose prefix length is at least `byte`
    ///
    /// Positions past the end clamp to the character count.
    pub fn ceil_char(&self, byte: usize) -> usize {
        self.prefix
            .partition_point(|&length| length < byte)
            .min(self.char_count())
    }

    /// Largest character index whose prefix length is at most `byte`
    pub fn floor_char(&self, byte: usize) -> usize {
        // prefix[0] is 0, so the partition point is never 0
        self.prefix.partition_point(|&length| length <= byte) - 1
    }

    /// The first character boundary at or after `byte`
    pub fn ceil(&self, byte: usize) -> usize {
        self.prefix[self.ceil_char(byte)]
    }

    /// The last character boundary at or before `byte`
    pub fn floor(&self, byte: usize) -> usize {
        self.prefix[self.floor_char(byte)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edit {
    old_start: usize,
    old_end: usize,
    new_len: usize,

    /// Total length change of this and all earlier edits
    shift_after: isize,
}

/// Maps byte offsets of a text to the offsets of its transformed version
///
/// Edits are recorded in increasing, non-overlapping order of their position
/// in the original text. An offset inside a replaced range maps into the
/// replacement, clamped to its length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetMap {
    edits: Vec<Edit>,
}

impl OffsetMap {
    /// A map that leaves every offset unchanged
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn is_identity(&self) -> bool {
        self.edits
            .iter()
            .all(|edit| edit.old_end - edit.old_start == edit.new_len)
    }

    /// Records that `old_start..old_end` was replaced by `new_len` bytes
    ///
    /// Edits that overlap or precede an already recorded edit are ignored.
    pub fn replace(&mut self, old_start: usize, old_end: usize, new_len: usize) {
        if old_end < old_start
            || self
                .edits
                .last()
                .is_some_and(|last| old_start < last.old_end)
        {
            return;
        }

        let previous = self.edits.last().map_or(0, |last| last.shift_after);
        let shift_after = previous + new_len as isize - (old_end - old_start) as isize;
        self.edits.push(Edit {
            old_start,
            old_end,
            new_len,
            shift_after,
        });
    }

    /// Records that `old_start..old_end` was removed
    pub fn delete(&mut self, old_start: usize, old_end: usize) {
        self.replace(old_start, old_end, 0);
    }

    /// Net change in length over the whole text
    pub fn total_shift(&self) -> isize {
        self.edits.last().map_or(0, |last| last.shift_after)
    }

    /// Maps an offset of the original text to the transformed text
    pub fn map(&self, offset: usize) -> usize {
        let index = self.edits.partition_point(|edit| edit.old_end <= offset);
        let shift = match index {
            0 => 0,
            _ => self.edits[index - 1].shift_after,
        };

        if let Some(edit) = self.edits.get(index) {
            if offset > edit.old_start {
                let start = edit.old_start.saturating_add_signed(shift);
                return start + (offset - edit.old_start).min(edit.new_len);
            }
        }

        offset.saturating_add_signed(shift)
    }
}
