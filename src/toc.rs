//! Table of contents extraction
//!
//! The EPUB3 navigation document is preferred; when it is missing or yields no
//! entries, the legacy NCX document is used instead. A publication without
//! either simply has an empty table of contents.

use std::io::{Read, Seek};

use log::{debug, warn};

use crate::{
    epub::EpubPackage,
    error::EpubError,
    types::TocEntry,
    utils::{NormalizeWhitespace, XmlElement, XmlReader, join_path, parent_dir, split_href},
};

/// Maps a decoded document href and the directory it was found in to an archive path
type Resolve<'r> = &'r dyn Fn(&str, &str) -> String;

/// Extracts the ordered table of contents of a package
///
/// Failures while reading or parsing a navigation document are logged and
/// treated like an absent document.
pub fn extract_toc<R: Read + Seek>(package: &mut EpubPackage<R>) -> Vec<TocEntry> {
    if let Some(nav) = package.nav_item().cloned() {
        match read_nav_document(package, &nav.path) {
            Ok(entries) if !entries.is_empty() => return entries,
            Ok(_) => debug!("Navigation document {} has no links.", nav.path),
            Err(err) => warn!("Failed to read navigation document {}: {}", nav.path, err),
        }
    }

    if let Some(ncx) = package.ncx_item().cloned() {
        match read_ncx_document(package, &ncx.path) {
            Ok(entries) => return entries,
            Err(err) => warn!("Failed to read NCX document {}: {}", ncx.path, err),
        }
    }

    vec![]
}

fn read_nav_document<R: Read + Seek>(
    package: &mut EpubPackage<R>,
    path: &str,
) -> Result<Vec<TocEntry>, EpubError> {
    let content = package.read_text(path)?;
    let root = XmlReader::parse_markup(&content)?;
    Ok(parse_nav_with(&root, path, &|base_dir, href| {
        package.resolve_href(base_dir, href)
    }))
}

fn read_ncx_document<R: Read + Seek>(
    package: &mut EpubPackage<R>,
    path: &str,
) -> Result<Vec<TocEntry>, EpubError> {
    let content = package.read_text(path)?;
    let root = XmlReader::parse(&content)?;
    parse_ncx_with(&root, path, &|base_dir, href| {
        package.resolve_href(base_dir, href)
    })
}

/// Collects every link of the table-of-contents `nav` element
///
/// The `nav` marked `epub:type="toc"` (or `role="doc-toc"`) wins; otherwise the
/// first `nav` of the document is used. Links are returned in document order.
///
/// Target documents are joined to the directory of `nav_path`.
pub fn parse_nav_document(root: &XmlElement, nav_path: &str) -> Vec<TocEntry> {
    parse_nav_with(root, nav_path, &join_path)
}

fn parse_nav_with(root: &XmlElement, nav_path: &str, resolve: Resolve<'_>) -> Vec<TocEntry> {
    let navs = root.find_elements_by_name("nav").collect::<Vec<_>>();
    let Some(nav) = navs
        .iter()
        .find(|nav| nav.attr_has_token("epub:type", "toc") || nav.attr("role") == Some("doc-toc"))
        .or_else(|| navs.first())
    else {
        return vec![];
    };

    let base_dir = parent_dir(nav_path);
    nav.find_elements_by_name("a")
        .filter_map(|link| {
            let href = link.attr("href")?;
            let title = match link.text().normalize_whitespace() {
                title if title.is_empty() => link.get_attr("title")?.normalize_whitespace(),
                title => title,
            };
            toc_entry(title, href, base_dir, nav_path, resolve)
        })
        .collect()
}

/// Walks the NCX `navMap`, flattening nested `navPoint`s in document order
pub fn parse_ncx_document(root: &XmlElement, ncx_path: &str) -> Result<Vec<TocEntry>, EpubError> {
    parse_ncx_with(root, ncx_path, &join_path)
}

fn parse_ncx_with(
    root: &XmlElement,
    ncx_path: &str,
    resolve: Resolve<'_>,
) -> Result<Vec<TocEntry>, EpubError> {
    let nav_map =
        root.find_elements_by_name("navMap")
            .next()
            .ok_or_else(|| EpubError::NonCanonicalFile {
                tag: "navMap".to_string(),
            })?;

    let mut entries = Vec::new();
    collect_nav_points(nav_map, parent_dir(ncx_path), ncx_path, resolve, &mut entries);
    Ok(entries)
}

fn collect_nav_points(
    parent: &XmlElement,
    base_dir: &str,
    ncx_path: &str,
    resolve: Resolve<'_>,
    entries: &mut Vec<TocEntry>,
) {
    for nav_point in parent.find_children_by_name("navPoint") {
        let title = nav_point
            .find_children_by_name("navLabel")
            .next()
            .map(|label| label.text().normalize_whitespace())
            .unwrap_or_default();
        let src = nav_point
            .find_children_by_name("content")
            .next()
            .and_then(|content| content.get_attr("src"));

        if let Some(entry) = src.and_then(|src| toc_entry(title, &src, base_dir, ncx_path, resolve)) {
            entries.push(entry);
        }

        collect_nav_points(nav_point, base_dir, ncx_path, resolve, entries);
    }
}

/// Builds an entry from a link, skipping untitled and external links
fn toc_entry(
    title: String,
    href: &str,
    base_dir: &str,
    source_path: &str,
    resolve: Resolve<'_>,
) -> Option<TocEntry> {
    let href = href.trim();
    if title.is_empty() || href.is_empty() || href.contains("://") || href.starts_with("mailto:")
    {
        return None;
    }

    let (document, fragment) = split_href(href);
    let path = if document.is_empty() {
        source_path.to_string()
    } else {
        resolve(base_dir, &document)
    };

    Some(TocEntry {
        title,
        path,
        fragment,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::{
        epub::EpubPackage,
        fixture::{EpubFixture, container_xml, package_opf, xhtml},
        toc::{extract_toc, parse_nav_document, parse_ncx_document},
        types::TocEntry,
        utils::XmlReader,
    };

    fn entry(title: &str, path: &str, fragment: Option<&str>) -> TocEntry {
        TocEntry {
            title: title.to_string(),
            path: path.to_string(),
            fragment: fragment.map(str::to_string),
        }
    }

    mod nav_document_tests {
        use super::*;

        /// The nav marked as toc wins over landmarks that precede it
        #[test]
        fn test_prefers_toc_nav() {
            let root = XmlReader::parse_markup(&xhtml(
                r##"<nav epub:type="landmarks"><ol><li><a href="cover.xhtml">Cover</a></li></ol></nav>
                <nav epub:type="toc"><h1>Contents</h1><ol>
                  <li><a href="text/ch1.xhtml">Chapter
                      One</a>
                    <ol><li><a href="text/ch1.xhtml#s1">Section 1</a></li></ol></li>
                  <li><a href="text/ch2.xhtml">Chapter Two</a></li>
                </ol></nav>"##,
            ))
            .unwrap();

            let entries = parse_nav_document(&root, "OEBPS/nav.xhtml");
            assert_eq!(
                entries,
                vec![
                    entry("Chapter One", "OEBPS/text/ch1.xhtml", None),
                    entry("Section 1", "OEBPS/text/ch1.xhtml", Some("s1")),
                    entry("Chapter Two", "OEBPS/text/ch2.xhtml", None),
                ]
            );
        }

        #[test]
        fn test_falls_back_to_first_nav() {
            let root = XmlReader::parse_markup(&xhtml(
                r##"<nav><ol><li><a href="#intro">Intro</a></li><li><a href="http://example.com">Site</a></li></ol></nav>"##,
            ))
            .unwrap();

            let entries = parse_nav_document(&root, "nav.xhtml");
            assert_eq!(entries, vec![entry("Intro", "nav.xhtml", Some("intro"))]);
        }

        #[test]
        fn test_no_nav_element() {
            let root = XmlReader::parse_markup(&xhtml("<p>No navigation</p>")).unwrap();
            assert!(parse_nav_document(&root, "nav.xhtml").is_empty());
        }
    }

    mod ncx_document_tests {
        use super::*;

        /// Nested navPoints are flattened in document order
        #[test]
        fn test_nested_nav_points() {
            let root = XmlReader::parse(
                r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="n1" playOrder="1">
      <navLabel><text>Part One</text></navLabel>
      <content src="part1.xhtml"/>
      <navPoint id="n2" playOrder="2">
        <navLabel><text>Chapter 1</text></navLabel>
        <content src="ch1.xhtml#c1"/>
      </navPoint>
    </navPoint>
    <navPoint id="n3" playOrder="3">
      <navLabel><text>Pride &amp; Prejudice</text></navLabel>
      <content src="ch2.xhtml"/>
    </navPoint>
  </navMap>
</ncx>"#,
            )
            .unwrap();

            let entries = parse_ncx_document(&root, "OEBPS/toc.ncx").unwrap();
            assert_eq!(
                entries,
                vec![
                    entry("Part One", "OEBPS/part1.xhtml", None),
                    entry("Chapter 1", "OEBPS/ch1.xhtml", Some("c1")),
                    entry("Pride & Prejudice", "OEBPS/ch2.xhtml", None),
                ]
            );
        }

        #[test]
        fn test_missing_nav_map() {
            let root = XmlReader::parse("<ncx><docTitle><text>T</text></docTitle></ncx>").unwrap();
            assert!(parse_ncx_document(&root, "toc.ncx").is_err());
        }
    }

    mod extract_toc_tests {
        use super::*;

        const NCX: &str = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="n1"><navLabel><text>Legacy One</text></navLabel><content src="ch1.xhtml"/></navPoint>
  </navMap>
</ncx>"#;

        /// A navigation document without links falls back to the NCX
        #[test]
        fn test_nav_without_links_falls_back_to_ncx() {
            let data = EpubFixture::new()
                .file("META-INF/container.xml", container_xml("OEBPS/content.opf"))
                .file(
                    "OEBPS/content.opf",
                    package_opf(
                        &[
                            ("nav", "nav.xhtml", "application/xhtml+xml", Some("nav")),
                            ("ncx", "toc.ncx", "application/x-dtbncx+xml", None),
                            ("ch1", "ch1.xhtml", "application/xhtml+xml", None),
                        ],
                        &["ch1"],
                        Some("ncx"),
                    ),
                )
                .file("OEBPS/nav.xhtml", xhtml("<nav epub:type=\"toc\"><ol></ol></nav>"))
                .file("OEBPS/toc.ncx", NCX)
                .file("OEBPS/ch1.xhtml", xhtml("<p>One</p>"))
                .build();
            let mut package = EpubPackage::from_reader(Cursor::new(data)).unwrap();

            assert_eq!(
                extract_toc(&mut package),
                vec![entry("Legacy One", "OEBPS/ch1.xhtml", None)]
            );
        }

        /// Targets written relative to the archive root resolve like manifest hrefs
        #[test]
        fn test_root_relative_targets() {
            let ncx = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="n1"><navLabel><text>Opening</text></navLabel><content src="OEBPS/ch1.xhtml"/></navPoint>
    <navPoint id="n2"><navLabel><text>Second part</text></navLabel><content src="OEBPS/ch1.xhtml#s2"/></navPoint>
  </navMap>
</ncx>"#;
            let data = EpubFixture::new()
                .file("META-INF/container.xml", container_xml("OEBPS/content.opf"))
                .file(
                    "OEBPS/content.opf",
                    package_opf(
                        &[
                            ("ncx", "OEBPS/toc.ncx", "application/x-dtbncx+xml", None),
                            ("ch1", "OEBPS/ch1.xhtml", "application/xhtml+xml", None),
                        ],
                        &["ch1"],
                        Some("ncx"),
                    ),
                )
                .file("OEBPS/toc.ncx", ncx)
                .file("OEBPS/ch1.xhtml", xhtml("<p>One</p>"))
                .build();
            let mut package = EpubPackage::from_reader(Cursor::new(data)).unwrap();

            assert_eq!(package.spine_documents()[0].path, "OEBPS/ch1.xhtml");
            assert_eq!(
                extract_toc(&mut package),
                vec![
                    entry("Opening", "OEBPS/ch1.xhtml", None),
                    entry("Second part", "OEBPS/ch1.xhtml", Some("s2")),
                ]
            );
        }

        /// Absence of any table of contents is not an error
        #[test]
        fn test_no_toc_at_all() {
            let data = EpubFixture::with_chapters(&[("ch1", "<p>One</p>")]).build();
            let mut package = EpubPackage::from_reader(Cursor::new(data)).unwrap();
            assert!(extract_toc(&mut package).is_empty());
        }
    }
}
