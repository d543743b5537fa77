//! Offset assembly and normalization
//!
//! Chapters are concatenated in spine order. Chapter-start and anchor offsets
//! are first recorded provisionally, then recomputed as a prefix sum over the
//! segments that were actually emitted, because per-segment post-processing
//! changes segment lengths after the provisional layout. The result is then
//! trimmed to the first real table-of-contents target, and every table of
//! contents position is re-aligned to a character boundary and checked
//! against the text itself.

use std::collections::HashMap;

use log::{log, warn};

use crate::{
    config::{ConvertOptions, PostProcessMode},
    index::is_indexable,
    offset::{OffsetMap, Utf8Index},
    types::{ChapterDecision, ProcessingStats, Segment, TocEntry},
};

/// Separator between two non-empty chapters
pub const SEPARATOR: &str = "\n\n";

/// A chapter after classification and extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterOutput {
    pub spine_index: usize,
    pub path: String,
    pub decision: ChapterDecision,
    pub text: String,

    /// Fragment id to chapter-relative byte offset
    pub anchors: HashMap<String, usize>,
}

/// Where a chapter begins in the final text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterStart {
    pub spine_index: usize,
    pub path: String,
    pub decision: ChapterDecision,
    pub start: usize,
}

/// The assembled text and everything positioned in it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembly {
    pub text: String,
    pub segments: Vec<Segment>,
    pub chapters: Vec<ChapterStart>,

    /// Final byte position of every table of contents entry, in TOC order
    ///
    /// `None` for entries whose target contributes no text or cannot be found.
    pub positions: Vec<Option<usize>>,

    /// Bytes of front matter removed from the start of the text
    pub trimmed: usize,

    pub stats: ProcessingStats,
}

impl Assembly {
    /// The decision for the chapter a TOC entry targets, if it is in the spine
    pub fn decision_for(&self, entry: &TocEntry) -> Option<ChapterDecision> {
        find_chapter(&self.chapters, &entry.path, |chapter| chapter.path.as_str())
            .map(|index| self.chapters[index].decision)
    }
}

/// A chapter's text after per-segment post-processing
struct Placed {
    spine_index: usize,
    path: String,
    decision: ChapterDecision,
    body: String,
    offsets: OffsetMap,
    anchors: HashMap<String, usize>,
    provisional_start: usize,
}

/// Concatenates chapters and positions the table of contents in the result
pub fn assemble(
    chapters: Vec<ChapterOutput>,
    toc: &[TocEntry],
    options: &ConvertOptions,
) -> Assembly {
    let level = options.diagnostic_level();
    let mut stats = ProcessingStats::default();

    // Provisional layout, from the lengths extraction produced
    let mut provisional = Vec::with_capacity(chapters.len());
    let mut counter = 0;
    let mut emitted_any = false;
    for chapter in &chapters {
        if chapter.decision != ChapterDecision::StandaloneToc && !chapter.text.is_empty() {
            if emitted_any {
                counter += SEPARATOR.len();
            }
            provisional.push(counter);
            counter += chapter.text.len();
            emitted_any = true;
        } else {
            provisional.push(counter);
        }
    }

    let per_segment = options
        .post_processing
        .as_ref()
        .filter(|post| post.mode == PostProcessMode::PerSegment);

    let placed = chapters
        .into_iter()
        .zip(provisional)
        .map(|(chapter, provisional_start)| {
            let (body, offsets) = match per_segment {
                Some(post)
                    if chapter.decision != ChapterDecision::StandaloneToc
                        && !chapter.text.is_empty() =>
                {
                    let processed = post.processor.process(&chapter.text);
                    if !processed.offsets.is_identity() {
                        log!(
                            level,
                            "{} changed chapter {} ({}) by {} bytes.",
                            post.processor.name(),
                            chapter.spine_index,
                            chapter.path,
                            processed.offsets.total_shift()
                        );
                    }
                    stats.merge(processed.stats);
                    (processed.text, processed.offsets)
                }
                _ if chapter.decision == ChapterDecision::StandaloneToc => {
                    (String::new(), OffsetMap::identity())
                }
                _ => (chapter.text, OffsetMap::identity()),
            };

            Placed {
                spine_index: chapter.spine_index,
                path: chapter.path,
                decision: chapter.decision,
                body,
                offsets,
                anchors: chapter.anchors,
                provisional_start,
            }
        })
        .collect::<Vec<_>>();

    // Reconcile: authoritative starts are the prefix sums of emitted segments
    let last_emitted = placed.iter().rposition(|chapter| !chapter.body.is_empty());
    let mut text = String::with_capacity(counter);
    let mut segments = Vec::new();
    let mut starts = Vec::with_capacity(placed.len());
    for (index, chapter) in placed.iter().enumerate() {
        let start = text.len();
        if start != chapter.provisional_start {
            log!(
                level,
                "Chapter {} ({}) start reconciled from {} to {}.",
                chapter.spine_index,
                chapter.path,
                chapter.provisional_start,
                start
            );
        }
        starts.push(start);

        if chapter.decision == ChapterDecision::StandaloneToc {
            continue;
        }

        let mut segment = chapter.body.clone();
        if !segment.is_empty() && last_emitted.is_some_and(|last| index < last) {
            segment.push_str(SEPARATOR);
        }
        text.push_str(&segment);
        segments.push(Segment {
            spine_index: chapter.spine_index,
            path: chapter.path.clone(),
            text: segment,
        });
    }

    // Untrimmed position of every TOC target
    let chapter_of = toc
        .iter()
        .map(|entry| find_chapter(&placed, &entry.path, |chapter| chapter.path.as_str()))
        .collect::<Vec<_>>();
    let targets = toc
        .iter()
        .zip(&chapter_of)
        .map(|(entry, &chapter_index)| {
            let index = chapter_index?;
            let chapter = &placed[index];
            if chapter.decision == ChapterDecision::StandaloneToc {
                return None;
            }

            let local = entry
                .fragment
                .as_ref()
                .and_then(|fragment| chapter.anchors.get(fragment))
                .map(|&offset| chapter.offsets.map(offset).min(chapter.body.len()))
                .unwrap_or(0);
            Some((index, starts[index] + local))
        })
        .collect::<Vec<_>>();
    let decision_of = |entry_index: usize| chapter_of[entry_index].map(|index| placed[index].decision);

    // Front-matter trimming
    let target = toc
        .iter()
        .zip(&targets)
        .find_map(|(entry, target)| {
            let (index, position) = (*target)?;
            is_indexable(entry, Some(placed[index].decision)).then_some(position)
        })
        .or_else(|| {
            placed
                .iter()
                .any(|chapter| chapter.decision == ChapterDecision::StandaloneToc)
                .then(|| {
                    placed
                        .iter()
                        .position(|chapter| chapter.decision != ChapterDecision::StandaloneToc)
                        .map(|index| starts[index])
                })
                .flatten()
        })
        .unwrap_or(0);

    let trimmed = trim_amount(&text, target);
    if trimmed > 0 {
        log!(level, "Trimmed {} bytes of front matter.", trimmed);
        text.replace_range(..trimmed, "");
        trim_segments(&mut segments, trimmed);
    }

    // Whole-text post-processing
    let mut whole_offsets = OffsetMap::identity();
    let whole_text = options
        .post_processing
        .as_ref()
        .filter(|post| post.mode == PostProcessMode::WholeText);
    if let Some(post) = whole_text {
        let processed = post.processor.process(&text);
        if !processed.offsets.is_identity() {
            log!(
                level,
                "{} changed the text by {} bytes.",
                post.processor.name(),
                processed.offsets.total_shift()
            );
        }
        stats.merge(processed.stats);
        remap_segments(&mut segments, &processed.offsets, &processed.text);
        text = processed.text;
        whole_offsets = processed.offsets;
    }

    let index = Utf8Index::new(&text);
    let project = |position: usize| index.floor(whole_offsets.map(position.saturating_sub(trimmed)));

    let chapters = placed
        .iter()
        .zip(&starts)
        .map(|(chapter, &start)| ChapterStart {
            spine_index: chapter.spine_index,
            path: chapter.path.clone(),
            decision: chapter.decision,
            start: project(start),
        })
        .collect::<Vec<_>>();

    // Drift correction against the final text
    let mut positions = toc
        .iter()
        .zip(&targets)
        .enumerate()
        .map(|(entry_index, (entry, target))| {
            let title = entry.title.trim();
            match (decision_of(entry_index), target) {
                (Some(ChapterDecision::StandaloneToc), _) => None,
                (_, Some((_, position))) => {
                    let computed = project(*position);
                    find_nearest(&text, &index, title, computed, options.drift_window)
                        .or(Some(computed))
                }
                (_, None) => {
                    let found = text.find(title).filter(|_| !title.is_empty());
                    if found.is_none() {
                        warn!(
                            "TOC entry \"{}\" points to {}, which is not in the spine.",
                            entry.title, entry.path
                        );
                    }
                    found
                }
            }
        })
        .collect::<Vec<_>>();

    // A small leading residual is an invisible-marker leftover
    let first = toc
        .iter()
        .zip(&positions)
        .enumerate()
        .find_map(|(entry_index, (entry, position))| {
            let position = (*position)?;
            is_indexable(entry, decision_of(entry_index)).then_some(position)
        });
    if let Some(residual) = first.filter(|&r| r > 0 && r <= options.residual_limit) {
        log!(level, "Removed a residual offset of {} bytes.", residual);
        for position in positions.iter_mut().flatten() {
            *position = index.floor(position.saturating_sub(residual));
        }
    }

    Assembly {
        text,
        segments,
        chapters,
        positions,
        trimmed,
        stats,
    }
}

/// Bytes to remove from the front so the text starts at `target`
///
/// The cut never splits a character: it moves to the first character whose
/// start is at or after `target`. Whitespace right after the cut is removed too.
pub fn trim_amount(text: &str, target: usize) -> usize {
    let index = Utf8Index::new(text);
    let cut = index.byte_offset(index.ceil_char(target));
    let rest = &text[cut..];
    cut + (rest.len() - rest.trim_start().len())
}

/// Removes `amount` bytes from the front of the segment list
fn trim_segments(segments: &mut [Segment], amount: usize) {
    let mut remaining = amount;
    for segment in segments.iter_mut() {
        if remaining == 0 {
            break;
        }

        let cut = remaining.min(segment.text.len());
        segment.text.replace_range(..cut, "");
        remaining -= cut;
    }
}

/// Re-slices segments after a transform of the concatenated text
fn remap_segments(segments: &mut [Segment], offsets: &OffsetMap, text: &str) {
    let mut old_start = 0;
    let mut new_start = 0;
    let count = segments.len();

    for (position, segment) in segments.iter_mut().enumerate() {
        let old_end = old_start + segment.text.len();
        let mut new_end = if position + 1 == count {
            text.len()
        } else {
            offsets.map(old_end).clamp(new_start, text.len())
        };
        while !text.is_char_boundary(new_end) {
            new_end -= 1;
        }

        segment.text = text[new_start..new_end].to_string();
        old_start = old_end;
        new_start = new_end;
    }
}

/// Finds a chapter by path, ignoring ASCII case as a fallback
fn find_chapter<T>(chapters: &[T], path: &str, path_of: impl Fn(&T) -> &str) -> Option<usize> {
    chapters
        .iter()
        .position(|chapter| path_of(chapter) == path)
        .or_else(|| {
            chapters
                .iter()
                .position(|chapter| path_of(chapter).eq_ignore_ascii_case(path))
        })
}

/// The occurrence of `title` closest to `position`, if within `window` bytes
fn find_nearest(
    text: &str,
    index: &Utf8Index,
    title: &str,
    position: usize,
    window: usize,
) -> Option<usize> {
    if title.is_empty() {
        return None;
    }

    let low = index.floor(position.saturating_sub(window));
    let high = index.ceil(
        position
            .saturating_add(window)
            .saturating_add(title.len())
            .min(text.len()),
    );

    text[low..high]
        .match_indices(title)
        .map(|(offset, _)| low + offset)
        .filter(|found| found.abs_diff(position) <= window)
        .min_by_key(|found| found.abs_diff(position))
}
