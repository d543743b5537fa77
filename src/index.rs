//! Index serialization and cover extraction
//!
//! The index ("idx") file lists the surviving table of contents entries, one
//! record per line: `#<index>#, #<title>#, #<bytePos>#, #<percent>#,`.

use std::io::{Read, Seek};

use log::{debug, warn};

use crate::{
    classify::is_directory_title,
    epub::EpubPackage,
    types::{ChapterDecision, CoverImage, IdxEntry, ManifestItem, TocEntry},
};

/// Checks whether a TOC entry belongs in the index
///
/// Entries titled with a directory-title keyword and entries that target a
/// standalone table-of-contents page are dropped.
pub fn is_indexable(entry: &TocEntry, decision: Option<ChapterDecision>) -> bool {
    !is_directory_title(&entry.title) && decision != Some(ChapterDecision::StandaloneToc)
}

/// Removes line breaks from a title and trims it
pub fn clean_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !matches!(c, '\n' | '\r'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Builds the index records for the positioned TOC entries
///
/// `positions` runs parallel to `toc`; entries without a position are skipped.
/// Records are numbered from 1 in TOC order.
pub fn build_index<F>(
    toc: &[TocEntry],
    positions: &[Option<usize>],
    decision_of: F,
    text: &str,
) -> Vec<IdxEntry>
where
    F: Fn(&TocEntry) -> Option<ChapterDecision>,
{
    let total = text.len();

    toc.iter()
        .zip(positions)
        .filter(|(entry, _)| is_indexable(entry, decision_of(entry)))
        .filter_map(|(entry, position)| {
            if position.is_none() {
                debug!("TOC entry \"{}\" has no position, skipped.", entry.title);
            }
            position.map(|position| (entry, floor_boundary(text, position)))
        })
        .enumerate()
        .map(|(index, (entry, byte_pos))| IdxEntry {
            index: index + 1,
            title: clean_title(&entry.title),
            byte_pos,
            percent: percent_of(byte_pos, total),
        })
        .collect()
}

/// Renders index records, one per line
pub fn render_index(entries: &[IdxEntry]) -> String {
    entries
        .iter()
        .map(IdxEntry::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn percent_of(position: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }

    let percent = position as f64 / total as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}

fn floor_boundary(text: &str, position: usize) -> usize {
    let mut position = position.min(text.len());
    while !text.is_char_boundary(position) {
        position -= 1;
    }
    position
}

/// Finds and reads the cover image of a package
///
/// The manifest item marked `cover-image` wins, then the item named by a legacy
/// `<meta name="cover">`, then any image whose id or file name mentions
/// "cover". Not finding a cover is not an error.
pub fn extract_cover<R: Read + Seek>(package: &mut EpubPackage<R>) -> Option<CoverImage> {
    let item = find_cover_item(package)?.clone();

    match package.read_entry(&item.path) {
        Ok(data) => Some(CoverImage {
            extension: cover_extension(&item),
            path: item.path,
            mime: item.mime,
            data,
        }),
        Err(err) => {
            warn!("Failed to read cover image {}: {}", item.path, err);
            None
        }
    }
}

fn find_cover_item<R: Read + Seek>(package: &EpubPackage<R>) -> Option<&ManifestItem> {
    let mut items = package.manifest.values().collect::<Vec<_>>();
    items.sort_by(|a, b| a.path.cmp(&b.path));

    if let Some(item) = items.iter().copied().find(|item| item.has_property("cover-image")) {
        return Some(item);
    }

    let legacy = package.cover_id.as_ref().and_then(|cover| {
        package.manifest.get(cover).or_else(|| {
            let path = package.resolve_manifest_href(cover);
            package.manifest_item_by_path(&path)
        })
    });
    if let Some(item) = legacy.filter(|item| item.mime.starts_with("image/")) {
        return Some(item);
    }

    items.into_iter().find(|item| {
        let file_name = item.path.rsplit('/').next().unwrap_or_default();
        item.mime.starts_with("image/")
            && (item.id.to_lowercase().contains("cover")
                || file_name.to_lowercase().contains("cover"))
    })
}

/// File extension for an image, from its media type or else its path
fn cover_extension(item: &ManifestItem) -> String {
    let from_mime = match item.mime.as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        "image/bmp" => Some("bmp"),
        _ => None,
    };

    from_mime
        .map(str::to_string)
        .or_else(|| {
            let file_name = item.path.rsplit('/').next()?;
            let (_, extension) = file_name.rsplit_once('.')?;
            (!extension.is_empty()).then(|| extension.to_lowercase())
        })
        .unwrap_or_else(|| "bin".to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::{
        epub::EpubPackage,
        fixture::{EpubFixture, container_xml, package_opf, xhtml},
        index::{build_index, clean_title, extract_cover, render_index},
        types::{ChapterDecision, TocEntry},
    };

    fn entry(title: &str, path: &str) -> TocEntry {
        TocEntry {
            title: title.to_string(),
            path: path.to_string(),
            fragment: None,
        }
    }

    mod index_tests {
        use super::*;

        #[test]
        fn test_build_and_render() {
            let text = "a".repeat(200);
            let toc = vec![
                entry("Contents", "toc.xhtml"),
                entry("Chapter\nOne ", "ch1.xhtml"),
                entry("Nav", "nav.xhtml"),
                entry("Lost", "ch9.xhtml"),
                entry("Chapter Two", "ch2.xhtml"),
            ];
            let positions = vec![Some(0), Some(0), Some(0), None, Some(50)];
            let decision_of = |entry: &TocEntry| match entry.path.as_str() {
                "nav.xhtml" => Some(ChapterDecision::StandaloneToc),
                "ch9.xhtml" => None,
                _ => Some(ChapterDecision::Normal),
            };

            let index = build_index(&toc, &positions, decision_of, &text);
            assert_eq!(
                render_index(&index),
                "#1#, #ChapterOne#, #0#, #0.00#,\n#2#, #Chapter Two#, #50#, #25.00#,"
            );
        }

        /// Positions inside a multi-byte character move back to its start
        #[test]
        fn test_positions_are_aligned() {
            let toc = vec![entry("Mid", "ch1.xhtml")];
            let index = build_index(&toc, &[Some(2)], |_| None, "目录");
            assert_eq!(index[0].byte_pos, 0);
            assert_eq!(index[0].percent, 0.0);
        }

        #[test]
        fn test_empty_text() {
            let toc = vec![entry("One", "ch1.xhtml")];
            let index = build_index(&toc, &[Some(0)], |_| None, "");
            assert_eq!(index[0].percent, 0.0);
            assert_eq!(render_index(&[]), "");
        }

        #[test]
        fn test_clean_title() {
            assert_eq!(clean_title("  Part\r\nOne  "), "PartOne");
        }
    }

    mod cover_tests {
        use super::*;

        fn package(items: &[(&str, &str, &str, Option<&str>)], extra: &[(&str, &[u8])]) -> Vec<u8> {
            let mut fixture = EpubFixture::new()
                .file("META-INF/container.xml", container_xml("OEBPS/content.opf"))
                .file("OEBPS/content.opf", package_opf(items, &["ch1"], None))
                .file("OEBPS/ch1.xhtml", xhtml("<p>x</p>"));
            for (path, data) in extra {
                fixture = fixture.file(path, data);
            }
            fixture.build()
        }

        #[test]
        fn test_cover_image_property() {
            let data = package(
                &[
                    ("ch1", "ch1.xhtml", "application/xhtml+xml", None),
                    ("img1", "images/cover-art.png", "image/png", None),
                    ("img2", "images/front.jpg", "image/jpeg", Some("cover-image")),
                ],
                &[
                    ("OEBPS/images/cover-art.png", "png-data".as_bytes()),
                    ("OEBPS/images/front.jpg", "jpeg-data".as_bytes()),
                ],
            );
            let mut package = EpubPackage::from_reader(Cursor::new(data)).unwrap();
            let cover = extract_cover(&mut package).unwrap();

            assert_eq!(cover.path, "OEBPS/images/front.jpg");
            assert_eq!(cover.extension, "jpg");
            assert_eq!(cover.data, b"jpeg-data");
        }

        #[test]
        fn test_cover_by_file_name() {
            let data = package(
                &[
                    ("ch1", "ch1.xhtml", "application/xhtml+xml", None),
                    ("img1", "images/Cover.webp", "image/webp", None),
                ],
                &[("OEBPS/images/Cover.webp", "webp".as_bytes())],
            );
            let mut package = EpubPackage::from_reader(Cursor::new(data)).unwrap();
            let cover = extract_cover(&mut package).unwrap();
            assert_eq!(cover.extension, "webp");
        }

        #[test]
        fn test_no_cover() {
            let data = package(&[("ch1", "ch1.xhtml", "application/xhtml+xml", None)], &[]);
            let mut package = EpubPackage::from_reader(Cursor::new(data)).unwrap();
            assert!(extract_cover(&mut package).is_none());
        }
    }
}
