//! In-memory EPUB archives for integration tests

#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::{CompressionMethod, ZipWriter, write::FileOptions};

/// Writes `(path, content)` pairs into a zip archive held in memory
pub fn zip(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::<()>::default().compression_method(CompressionMethod::Stored);

    for (name, content) in files {
        zip.start_file(name.as_str(), options).unwrap();
        zip.write_all(content).unwrap();
    }

    zip.finish().unwrap().into_inner()
}

/// Builds a publication at `OEBPS/content.opf` with an NCX table of contents
pub struct Book {
    chapters: Vec<(String, String)>,
    toc: Vec<(String, String)>,
    stylesheet: Option<String>,
}

impl Book {
    pub fn new() -> Self {
        Self {
            chapters: vec![],
            toc: vec![],
            stylesheet: None,
        }
    }

    /// Adds a spine document `OEBPS/<id>.xhtml` with the given body markup
    pub fn chapter(mut self, id: &str, body: impl Into<String>) -> Self {
        self.chapters.push((id.to_string(), body.into()));
        self
    }

    /// Adds an NCX entry; `src` is relative to the package document
    pub fn toc_entry(mut self, title: &str, src: &str) -> Self {
        self.toc.push((title.to_string(), src.to_string()));
        self
    }

    /// Adds `OEBPS/style.css`, linked from every chapter
    pub fn stylesheet(mut self, css: &str) -> Self {
        self.stylesheet = Some(css.to_string());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut files = vec![
            (
                "META-INF/container.xml".to_string(),
                container_xml().into_bytes(),
            ),
            ("OEBPS/content.opf".to_string(), self.package().into_bytes()),
            ("OEBPS/toc.ncx".to_string(), self.ncx().into_bytes()),
        ];
        for (id, body) in &self.chapters {
            files.push((format!("OEBPS/{}.xhtml", id), self.xhtml(body).into_bytes()));
        }
        if let Some(css) = &self.stylesheet {
            files.push(("OEBPS/style.css".to_string(), css.clone().into_bytes()));
        }

        zip(&files)
    }

    fn package(&self) -> String {
        let mut manifest = self
            .chapters
            .iter()
            .map(|(id, _)| {
                format!(
                    r#"    <item id="{0}" href="{0}.xhtml" media-type="application/xhtml+xml"/>"#,
                    id
                )
            })
            .collect::<Vec<_>>();
        manifest.push(
            r#"    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>"#.to_string(),
        );
        if self.stylesheet.is_some() {
            manifest.push(r#"    <item id="css" href="style.css" media-type="text/css"/>"#.to_string());
        }
        let itemrefs = self
            .chapters
            .iter()
            .map(|(id, _)| format!(r#"    <itemref idref="{}"/>"#, id))
            .collect::<Vec<_>>();

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="pub-id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="pub-id">urn:uuid:integration</dc:identifier>
    <dc:title>Integration Book</dc:title>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
{}
  </manifest>
  <spine toc="ncx">
{}
  </spine>
</package>"#,
            manifest.join("\n"),
            itemrefs.join("\n")
        )
    }

    fn ncx(&self) -> String {
        let points = self
            .toc
            .iter()
            .enumerate()
            .map(|(index, (title, src))| {
                format!(
                    r#"    <navPoint id="p{0}" playOrder="{0}"><navLabel><text>{1}</text></navLabel><content src="{2}"/></navPoint>"#,
                    index + 1,
                    title,
                    src
                )
            })
            .collect::<Vec<_>>();

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <docTitle><text>Integration Book</text></docTitle>
  <navMap>
{}
  </navMap>
</ncx>"#,
            points.join("\n")
        )
    }

    fn xhtml(&self, body: &str) -> String {
        let link = if self.stylesheet.is_some() {
            r#"<link rel="stylesheet" type="text/css" href="style.css"/>"#
        } else {
            ""
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Chapter</title>{}</head>
<body>{}</body>
</html>"#,
            link, body
        )
    }
}

pub fn container_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#
        .to_string()
}

/// `count` list items linking to `ch2.xhtml#s<i>`
pub fn link_items(count: usize) -> String {
    (1..=count)
        .map(|i| format!(r#"<li><a href="ch2.xhtml#s{0}">Section {0}</a></li>"#, i))
        .collect()
}
