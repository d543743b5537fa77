mod common;

use std::io::Cursor;

use epub_txt::{
    BlankLineRemover, CancelToken, ConvertOptions, Converter, EpubError, PostProcessMode,
    PostProcessing, types::ChapterDecision,
};

use common::{Book, container_xml, link_items, zip};

fn convert(data: Vec<u8>, options: ConvertOptions) -> epub_txt::Conversion {
    Converter::new(options)
        .convert_reader(Cursor::new(data))
        .unwrap()
}

fn blank_line_removal(mode: PostProcessMode) -> ConvertOptions {
    ConvertOptions::default().with_post_processing(PostProcessing::new(BlankLineRemover, mode))
}

/// A leading navigation page is dropped and the text starts at the first chapter
#[test]
fn test_standalone_toc_page_is_trimmed() {
    let data = Book::new()
        .chapter("nav", format!("<nav><ol>{}</ol></nav>", link_items(12)))
        .chapter("ch2", "<h1>Chapter One</h1><p>It was a bright cold day in April.</p>")
        .chapter("ch3", "<h1>Chapter Two</h1><p>The clocks were striking thirteen.</p>")
        .toc_entry("Chapter One", "ch2.xhtml")
        .toc_entry("Chapter Two", "ch3.xhtml")
        .build();

    let conversion = convert(data, ConvertOptions::default());

    assert_eq!(conversion.chapters[0].decision, ChapterDecision::StandaloneToc);
    assert!(conversion.text.starts_with("Chapter One"));
    assert_eq!(conversion.segments.len(), 2);

    let index = conversion.index.as_ref().unwrap();
    assert_eq!(index.len(), 2);
    assert_eq!(index[0].byte_pos, 0);
    assert_eq!(index[1].byte_pos, conversion.segments[0].text.len());
    assert_eq!(
        conversion.render_index().unwrap(),
        format!(
            "#1#, #Chapter One#, #0#, #0.00#,\n#2#, #Chapter Two#, #{}#, #{:.2}#,",
            index[1].byte_pos, index[1].percent
        )
    );
}

/// A directory heading with a short link list in front of real content
#[test]
fn test_embedded_directory_is_stripped() {
    let content = "正文".repeat(1500);
    let data = Book::new()
        .chapter(
            "ch1",
            format!("<h1>目录</h1><ul>{}</ul><p>{}</p>", link_items(5), content),
        )
        .toc_entry("第一章", "ch1.xhtml")
        .build();

    let conversion = convert(data, ConvertOptions::default());

    assert_eq!(conversion.chapters[0].decision, ChapterDecision::Mixed);
    assert_eq!(conversion.text, content);
    assert!(!conversion.text.contains("目录"));
    assert!(!conversion.text.contains("Section 1"));
}

fn three_chapter_book() -> Vec<u8> {
    let lines = (1..=41)
        .map(|i| format!(r#"<p id="s{0}">Line {0}.</p>"#, i))
        .collect::<String>();

    Book::new()
        .chapter("ch1", "<p>Opening chapter.</p>")
        .chapter("ch2", lines)
        .chapter("ch3", "<p>Chapter Three begins.</p>")
        .toc_entry("Opening", "ch1.xhtml")
        .toc_entry("Line 21", "ch2.xhtml#s21")
        .toc_entry("Chapter Three", "ch3.xhtml")
        .build()
}

/// Blank lines removed inside chapter two move later entries back by the same amount
#[test]
fn test_per_segment_post_processing_shift() {
    let plain = convert(three_chapter_book(), ConvertOptions::default());
    let processed = convert(
        three_chapter_book(),
        blank_line_removal(PostProcessMode::PerSegment),
    );

    let plain_index = plain.index.unwrap();
    let processed_index = processed.index.unwrap();
    assert_eq!(plain_index.len(), 3);
    assert_eq!(processed_index.len(), 3);

    assert_eq!(processed_index[0].byte_pos, 0);
    assert_eq!(plain_index[1].byte_pos - processed_index[1].byte_pos, 20);
    assert_eq!(plain_index[2].byte_pos - processed_index[2].byte_pos, 40);

    assert_eq!(processed.stats.lines_removed, 40);
    assert_eq!(processed.stats.bytes_removed, 40);
    assert_eq!(plain.text.len() - processed.text.len(), 40);
}

#[test]
fn test_whole_text_post_processing() {
    let conversion = convert(
        three_chapter_book(),
        blank_line_removal(PostProcessMode::WholeText),
    );
    let index = conversion.index.as_ref().unwrap();

    assert!(!conversion.text.contains("\n\n"));
    assert_eq!(
        Some(index[1].byte_pos),
        conversion.text.find("Line 21.")
    );
    assert_eq!(
        Some(index[2].byte_pos),
        conversion.text.find("Chapter Three")
    );
}

/// Anchored entries point at the anchored paragraph
#[test]
fn test_fragment_positions() {
    let conversion = convert(three_chapter_book(), ConvertOptions::default());
    let index = conversion.index.as_ref().unwrap();

    assert_eq!(Some(index[1].byte_pos), conversion.text.find("Line 21."));
    assert!(conversion.text[index[2].byte_pos..].starts_with("Chapter Three"));
}

#[test]
fn test_parallel_and_sequential_agree() {
    let parallel = convert(three_chapter_book(), ConvertOptions::default());
    let sequential = convert(
        three_chapter_book(),
        ConvertOptions::default().with_parallel(false),
    );

    assert_eq!(parallel.text, sequential.text);
    assert_eq!(parallel.index, sequential.index);
    assert_eq!(parallel.chapters, sequential.chapters);
}

#[test]
fn test_stylesheet_hidden_content() {
    let data = Book::new()
        .chapter(
            "ch1",
            r#"<p>Visible text.</p><p class="footnote">Hidden note.</p><div hidden="hidden">Also hidden.</div>"#,
        )
        .stylesheet("p.footnote { display: none; }")
        .toc_entry("Visible", "ch1.xhtml")
        .build();

    let conversion = convert(data, ConvertOptions::default());
    assert_eq!(conversion.text, "Visible text.");
}

#[test]
fn test_cancelled_conversion() {
    let token = CancelToken::new();
    token.cancel();

    let result = Converter::new(ConvertOptions::default())
        .with_cancel_token(token)
        .convert_reader(Cursor::new(three_chapter_book()));

    let err = result.unwrap_err();
    assert!(err.is_cancelled());
    assert!(!err.is_fatal());
}

#[test]
fn test_missing_container_is_fatal() {
    let data = zip(&[("OEBPS/ch1.xhtml".to_string(), b"<html/>".to_vec())]);
    let result = Converter::default().convert_reader(Cursor::new(data));

    let err = result.unwrap_err();
    assert!(matches!(err, EpubError::MissingContainer));
    assert!(err.is_fatal());
}

#[test]
fn test_missing_package_is_fatal() {
    let data = zip(&[(
        "META-INF/container.xml".to_string(),
        container_xml().into_bytes(),
    )]);
    let result = Converter::default().convert_reader(Cursor::new(data));

    match result {
        Err(EpubError::MissingPackage { path }) => assert_eq!(path, "OEBPS/content.opf"),
        other => panic!("unexpected result: {:?}", other.map(|conversion| conversion.text)),
    }
}

#[test]
fn test_write_artifacts() {
    let conversion = convert(three_chapter_book(), ConvertOptions::default());
    let dir = tempfile::tempdir().unwrap();

    let written = conversion.write_to_dir(dir.path(), "book").unwrap();
    assert_eq!(written.len(), 2);

    let text = std::fs::read_to_string(dir.path().join("book.txt")).unwrap();
    let index = std::fs::read_to_string(dir.path().join("book.idx")).unwrap();
    assert_eq!(text, conversion.text);
    assert_eq!(index.lines().count(), 3);
    assert!(index.starts_with("#1#, #Opening#, #0#, #0.00#,"));
}
