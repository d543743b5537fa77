use std::fmt;

/// Represents a resource item declared in the EPUB manifest
///
/// Every resource the publication references is declared in the manifest with an
/// id, a location and a media type. The `path` stored here is already resolved
/// against the package document's directory to a canonical archive entry path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    /// The unique id of the resource within the package
    pub id: String,

    /// The canonical archive entry path of the resource
    pub path: String,

    /// The media type of the resource
    pub mime: String,

    /// Optional space-separated property flags (`nav`, `cover-image`, ...)
    pub properties: Option<String>,
}

impl ManifestItem {
    /// Checks whether the item carries the given property flag
    pub fn has_property(&self, property: &str) -> bool {
        self.properties
            .as_ref()
            .is_some_and(|props| props.split_ascii_whitespace().any(|p| p == property))
    }

    /// Checks whether the item is an (X)HTML content document
    pub fn is_markup(&self) -> bool {
        matches!(
            self.mime.as_str(),
            "application/xhtml+xml" | "text/html" | "application/xml" | "text/xml"
        )
    }
}

/// Represents an item in the EPUB spine
///
/// Spine order is document order: it is the single source of truth for the
/// order of chapters in the converted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    /// The ID reference to a manifest item
    pub idref: String,

    /// Indicates whether this item is part of the linear reading order
    ///
    /// Non-linear items are still converted; the flag is kept for callers.
    pub linear: bool,
}

/// One entry of the publication's table of contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    /// The display title of the entry
    pub title: String,

    /// The canonical archive path of the document the entry targets
    pub path: String,

    /// The anchor id inside the target document, if any
    pub fragment: Option<String>,
}

/// How a spine document takes part in the converted text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChapterDecision {
    /// Converted as is
    #[default]
    Normal,

    /// Converted after its embedded navigation block has been removed
    Mixed,

    /// A pure table-of-contents page; contributes zero bytes
    StandaloneToc,
}

impl fmt::Display for ChapterDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChapterDecision::Normal => "normal",
            ChapterDecision::Mixed => "mixed",
            ChapterDecision::StandaloneToc => "standalone-toc",
        };
        f.write_str(label)
    }
}

/// A chapter's contribution to the final text
///
/// Segments are produced in spine order and never change once assembled. The
/// byte lengths of all segments add up to the byte length of the final text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Index of the chapter in the spine
    pub spine_index: usize,

    /// Archive path of the chapter document
    pub path: String,

    /// The emitted text, including the separator that follows it
    pub text: String,
}

impl Segment {
    /// Number of UTF-8 bytes the segment occupies in the final text
    pub fn byte_len(&self) -> usize {
        self.text.len()
    }
}

/// One serialized record of the index file
#[derive(Debug, Clone, PartialEq)]
pub struct IdxEntry {
    /// 1-based position of the record
    pub index: usize,

    /// Entry title with newlines stripped
    pub title: String,

    /// Absolute byte position in the final text, always on a character boundary
    pub byte_pos: usize,

    /// Share of the total byte count preceding the entry, in percent
    pub percent: f64,
}

impl fmt::Display for IdxEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{}#, #{}#, #{}#, #{:.2}#,",
            self.index, self.title, self.byte_pos, self.percent
        )
    }
}

/// The cover image found in the package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    /// Archive path of the image
    pub path: String,

    /// Media type declared in the manifest
    pub mime: String,

    /// File extension inferred from the media type
    pub extension: String,

    /// Raw image bytes
    pub data: Vec<u8>,
}

/// Statistics reported by a post-processing step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingStats {
    pub lines_removed: usize,
    pub bytes_removed: usize,
}

impl ProcessingStats {
    /// Adds another chapter's statistics onto these
    pub fn merge(&mut self, other: ProcessingStats) {
        self.lines_removed += other.lines_removed;
        self.bytes_removed += other.bytes_removed;
    }
}

impl fmt::Display for ProcessingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lines removed, {} bytes removed",
            self.lines_removed, self.bytes_removed
        )
    }
}
