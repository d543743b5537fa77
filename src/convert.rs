//! Conversion pipeline
//!
//! A conversion runs in three phases. Archive entries are read sequentially,
//! because the zip reader needs exclusive access. Every spine document is then
//! parsed, classified and extracted on its own, in parallel unless
//! [`ConvertOptions::parallel`] is off. Finally the chapters are assembled in
//! spine order and the index is built from the assembled text.
//!
//! ## Example
//!
//! ```rust, no_run
//! # use epub_txt::{config::ConvertOptions, convert::Converter};
//! # fn main() -> Result<(), epub_txt::error::EpubError> {
//! let converter = Converter::new(ConvertOptions::default().with_cover(true));
//! let conversion = converter.convert_file("path/to/book.epub")?;
//! conversion.write_to_dir("out", "book")?;
//! # Ok(())
//! # }
//! ```

use std::{
    collections::{HashMap, HashSet},
    fs,
    io::{Read, Seek},
    path::{Path, PathBuf},
};

use log::{debug, info, log, warn};
use rayon::prelude::*;

use crate::{
    assemble::{ChapterOutput, ChapterStart, assemble},
    classify::{classify, is_directory_title},
    config::{CancelToken, ConvertOptions},
    epub::EpubPackage,
    error::EpubError,
    extract::extract_chapter,
    index::{build_index, extract_cover, render_index},
    style::{StyleVisibility, Stylesheet},
    toc::extract_toc,
    types::{ChapterDecision, CoverImage, IdxEntry, ProcessingStats, Segment, TocEntry},
    utils::{DecodeBytes, XmlReader, fold_title, join_path, parent_dir, split_href},
};

/// The result of converting one publication
#[derive(Debug, Clone)]
pub struct Conversion {
    /// Title from the package metadata
    pub title: Option<String>,

    /// The plain text of the whole publication
    pub text: String,

    /// Index records, `None` when the index was not requested
    pub index: Option<Vec<IdxEntry>>,

    /// The table of contents as read from the package
    pub toc: Vec<TocEntry>,

    /// Every spine document with its decision and start in `text`
    pub chapters: Vec<ChapterStart>,

    /// The emitted pieces of `text`, in order
    pub segments: Vec<Segment>,

    /// Bytes of front matter removed from the start of the text
    pub trimmed: usize,

    pub cover: Option<CoverImage>,
    pub stats: ProcessingStats,
}

impl Conversion {
    /// The byte length of the text
    pub fn total_bytes(&self) -> usize {
        self.text.len()
    }

    /// The index file content, if an index was built
    pub fn render_index(&self) -> Option<String> {
        self.index.as_deref().map(render_index)
    }

    /// Chapters the classifier kept out of the text
    pub fn standalone_chapters(&self) -> impl Iterator<Item = &ChapterStart> {
        self.chapters
            .iter()
            .filter(|chapter| chapter.decision == ChapterDecision::StandaloneToc)
    }

    /// Writes `<stem>.txt`, `<stem>.idx` and `cover.<ext>` into `dir`
    ///
    /// The index and the cover are only written when present. Returns the
    /// paths of the written files.
    pub fn write_to_dir<P: AsRef<Path>>(&self, dir: P, stem: &str) -> Result<Vec<PathBuf>, EpubError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let mut written = vec![];

        let text_path = dir.join(format!("{}.txt", stem));
        fs::write(&text_path, &self.text)?;
        written.push(text_path);

        if let Some(index) = self.render_index() {
            let index_path = dir.join(format!("{}.idx", stem));
            fs::write(&index_path, index)?;
            written.push(index_path);
        }

        if let Some(cover) = &self.cover {
            let cover_path = dir.join(format!("cover.{}", cover.extension));
            fs::write(&cover_path, &cover.data)?;
            written.push(cover_path);
        }

        Ok(written)
    }
}

/// A spine document read from the archive, waiting to be processed
struct ChapterSource {
    spine_index: usize,
    path: String,
    markup: Option<Vec<u8>>,
}

/// Read-only data shared by every chapter worker
struct ChapterContext {
    /// Folded TOC titles, without directory-title keywords
    known_titles: HashSet<String>,

    /// Fragments the TOC targets, keyed by lowercased document path
    wanted: HashMap<String, HashSet<String>>,

    /// Stylesheet text keyed by archive path
    stylesheets: HashMap<String, String>,
}

/// Converts EPUB packages to plain text with a set of options
#[derive(Debug, Clone, Default)]
pub struct Converter {
    options: ConvertOptions,
    cancel: CancelToken,
}

impl Converter {
    pub fn new(options: ConvertOptions) -> Self {
        Self {
            options,
            cancel: CancelToken::new(),
        }
    }

    /// Shares an existing cancellation token with this converter
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that cancels conversions run by this converter
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Opens and converts the EPUB file at `path`
    pub fn convert_file<P: AsRef<Path>>(&self, path: P) -> Result<Conversion, EpubError> {
        let mut package = EpubPackage::open(path)?;
        self.convert(&mut package)
    }

    /// Converts an EPUB archive from any seekable reader
    pub fn convert_reader<R: Read + Seek>(&self, reader: R) -> Result<Conversion, EpubError> {
        let mut package = EpubPackage::from_reader(reader)?;
        self.convert(&mut package)
    }

    /// Converts an already opened package
    pub fn convert<R: Read + Seek>(&self, package: &mut EpubPackage<R>) -> Result<Conversion, EpubError> {
        let toc = extract_toc(package);
        debug!("Table of contents has {} entries.", toc.len());

        let sources = self.read_spine(package)?;
        let context = ChapterContext {
            known_titles: known_titles(&toc),
            wanted: wanted_fragments(&toc),
            stylesheets: read_stylesheets(package),
        };

        let process = |source: ChapterSource| -> Result<ChapterOutput, EpubError> {
            self.check_cancelled()?;
            Ok(self.process_chapter(source, &context))
        };
        let chapters = if self.options.parallel {
            sources
                .into_par_iter()
                .map(process)
                .collect::<Result<Vec<_>, _>>()?
        } else {
            sources
                .into_iter()
                .map(process)
                .collect::<Result<Vec<_>, _>>()?
        };
        self.check_cancelled()?;

        let assembly = assemble(chapters, &toc, &self.options);
        let index = self.options.emit_index.then(|| {
            build_index(
                &toc,
                &assembly.positions,
                |entry| assembly.decision_for(entry),
                &assembly.text,
            )
        });
        let cover = if self.options.extract_cover {
            extract_cover(package)
        } else {
            None
        };

        info!(
            "Converted {} chapters into {} bytes ({} index entries).",
            assembly.chapters.len(),
            assembly.text.len(),
            index.as_ref().map_or(0, Vec::len)
        );

        Ok(Conversion {
            title: package.title.clone(),
            text: assembly.text,
            index,
            toc,
            chapters: assembly.chapters,
            segments: assembly.segments,
            trimmed: assembly.trimmed,
            cover,
            stats: assembly.stats,
        })
    }

    fn check_cancelled(&self) -> Result<(), EpubError> {
        if self.cancel.is_cancelled() {
            return Err(EpubError::Cancelled);
        }
        Ok(())
    }

    /// Reads the markup of every spine document, in spine order
    ///
    /// A document listed twice is only read the first time. Documents that
    /// cannot be read become empty chapters.
    fn read_spine<R: Read + Seek>(&self, package: &mut EpubPackage<R>) -> Result<Vec<ChapterSource>, EpubError> {
        let mut seen = HashSet::new();
        let mut sources = vec![];

        for (spine_index, item) in package.spine_documents().into_iter().enumerate() {
            self.check_cancelled()?;

            if !seen.insert(item.path.clone()) {
                debug!("Spine document {} appears again, skipped.", item.path);
                continue;
            }

            let markup = if !item.is_markup() {
                warn!("Spine document {} is not markup ({}).", item.path, item.mime);
                None
            } else {
                match package.read_entry(&item.path) {
                    Ok(markup) => Some(markup),
                    Err(err) => {
                        warn!("Failed to read spine document {}: {}", item.path, err);
                        None
                    }
                }
            };

            sources.push(ChapterSource {
                spine_index,
                path: item.path,
                markup,
            });
        }

        Ok(sources)
    }

    /// Parses, classifies and extracts one spine document
    ///
    /// Any fault inside the document leaves an empty normal chapter behind.
    fn process_chapter(&self, source: ChapterSource, context: &ChapterContext) -> ChapterOutput {
        let level = self.options.diagnostic_level();
        let output = |decision, text, anchors| ChapterOutput {
            spine_index: source.spine_index,
            path: source.path.clone(),
            decision,
            text,
            anchors,
        };

        let Some(markup) = &source.markup else {
            return output(ChapterDecision::Normal, String::new(), HashMap::new());
        };
        let mut root = match markup.decode().and_then(|content| XmlReader::parse_markup(&content)) {
            Ok(root) => root,
            Err(err) => {
                warn!("Failed to parse spine document {}: {}", source.path, err);
                return output(ChapterDecision::Normal, String::new(), HashMap::new());
            }
        };

        let classification = classify(&root, &context.known_titles, &self.options.thresholds);
        let metrics = &classification.metrics;
        log!(
            level,
            "{}: {} (links {}/{}, nav ratio {:.2}, other text {}, title lines {}/{})",
            source.path,
            classification.decision,
            metrics.link_count,
            metrics.body_link_count,
            metrics.nav_ratio,
            metrics.non_nav_len,
            metrics.title_matches,
            metrics.title_lines
        );

        if classification.decision == ChapterDecision::StandaloneToc {
            return output(ChapterDecision::StandaloneToc, String::new(), HashMap::new());
        }
        classification.strip(&mut root);

        let base_dir = parent_dir(&source.path);
        let stylesheet = Stylesheet::from_document(&root, |href| {
            let (path, _) = split_href(href);
            let path = join_path(base_dir, &path);
            let css = context.stylesheets.get(&path).cloned();
            if css.is_none() {
                debug!("Stylesheet {} linked from {} was not found.", path, source.path);
            }
            css
        });

        let empty = HashSet::new();
        let wanted = context
            .wanted
            .get(&source.path.to_lowercase())
            .unwrap_or(&empty);
        let chapter = extract_chapter(&root, wanted, &StyleVisibility::new(stylesheet));

        output(classification.decision, chapter.text, chapter.anchors)
    }
}

/// Converts the EPUB file at `path` with the given options
pub fn convert_file<P: AsRef<Path>>(path: P, options: ConvertOptions) -> Result<Conversion, EpubError> {
    Converter::new(options).convert_file(path)
}

fn known_titles(toc: &[TocEntry]) -> HashSet<String> {
    toc.iter()
        .filter(|entry| !is_directory_title(&entry.title))
        .map(|entry| fold_title(&entry.title))
        .filter(|title| !title.is_empty())
        .collect()
}

fn wanted_fragments(toc: &[TocEntry]) -> HashMap<String, HashSet<String>> {
    let mut wanted = HashMap::<String, HashSet<String>>::new();
    for entry in toc {
        if let Some(fragment) = &entry.fragment {
            wanted
                .entry(entry.path.to_lowercase())
                .or_default()
                .insert(fragment.clone());
        }
    }
    wanted
}

/// Reads every stylesheet the manifest declares
fn read_stylesheets<R: Read + Seek>(package: &mut EpubPackage<R>) -> HashMap<String, String> {
    let paths = package
        .manifest
        .values()
        .filter(|item| item.mime == "text/css")
        .map(|item| item.path.clone())
        .collect::<Vec<_>>();

    paths
        .into_iter()
        .filter_map(|path| match package.read_text(&path) {
            Ok(css) => Some((path, css)),
            Err(err) => {
                warn!("Failed to read stylesheet {}: {}", path, err);
                None
            }
        })
        .collect()
}
