//! In-memory EPUB archives for unit tests

use std::io::{Cursor, Write};

use zip::{CompressionMethod, ZipWriter, write::FileOptions};

/// Collects archive entries and writes them into a zip held in memory
pub struct EpubFixture {
    files: Vec<(String, Vec<u8>)>,
}

impl EpubFixture {
    pub fn new() -> Self {
        Self { files: vec![] }
    }

    /// A package at `OEBPS/content.opf` whose spine lists one document per chapter
    ///
    /// Each chapter is stored as `OEBPS/<id>.xhtml` with the given body markup.
    pub fn with_chapters(chapters: &[(&str, &str)]) -> Self {
        let hrefs = chapters
            .iter()
            .map(|(id, _)| format!("{}.xhtml", id))
            .collect::<Vec<_>>();
        let items = chapters
            .iter()
            .zip(&hrefs)
            .map(|((id, _), href)| (*id, href.as_str(), "application/xhtml+xml", None))
            .collect::<Vec<_>>();
        let spine = chapters.iter().map(|(id, _)| *id).collect::<Vec<_>>();

        let mut fixture = Self::new()
            .file("META-INF/container.xml", container_xml("OEBPS/content.opf"))
            .file("OEBPS/content.opf", package_opf(&items, &spine, None));
        for ((_, body), href) in chapters.iter().zip(&hrefs) {
            fixture = fixture.file(&format!("OEBPS/{}", href), xhtml(body));
        }

        fixture
    }

    pub fn file(mut self, path: &str, content: impl AsRef<[u8]>) -> Self {
        self.files.retain(|(name, _)| name != path);
        self.files.push((path.to_string(), content.as_ref().to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::<()>::default().compression_method(CompressionMethod::Stored);

        for (name, content) in &self.files {
            zip.start_file(name.as_str(), options).unwrap();
            zip.write_all(content).unwrap();
        }

        zip.finish().unwrap().into_inner()
    }
}

pub fn container_xml(package_path: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="{}" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
        package_path
    )
}

/// Builds a package document from `(id, href, media-type, properties)` items
pub fn package_opf(
    items: &[(&str, &str, &str, Option<&str>)],
    spine: &[&str],
    toc: Option<&str>,
) -> String {
    let manifest = items
        .iter()
        .map(|(id, href, mime, properties)| match properties {
            Some(properties) => format!(
                r#"    <item id="{}" href="{}" media-type="{}" properties="{}"/>"#,
                id, href, mime, properties
            ),
            None => format!(
                r#"    <item id="{}" href="{}" media-type="{}"/>"#,
                id, href, mime
            ),
        })
        .collect::<Vec<_>>()
        .join("\n");
    let itemrefs = spine
        .iter()
        .map(|idref| format!(r#"    <itemref idref="{}"/>"#, idref))
        .collect::<Vec<_>>()
        .join("\n");
    let toc = toc
        .map(|id| format!(r#" toc="{}""#, id))
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="pub-id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="pub-id">urn:uuid:fixture</dc:identifier>
    <dc:title>Fixture Book</dc:title>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
{}
  </manifest>
  <spine{}>
{}
  </spine>
</package>"#,
        manifest, toc, itemrefs
    )
}

pub fn xhtml(body: &str) -> String {
    xhtml_with_head("", body)
}

pub fn xhtml_with_head(head: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Fixture</title>{}</head>
<body>{}</body>
</html>"#,
        head, body
    )
}
