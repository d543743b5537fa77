mod common;

use std::io::Cursor;

use epub_txt::{
    BlankLineRemover, ConvertOptions, Converter, PostProcessMode, PostProcessing,
    assemble::trim_amount, classify::is_directory_title,
};
use proptest::prelude::*;

use common::Book;

/// Chapters as lists of paragraphs, mixing ASCII with multi-byte text
fn chapters() -> impl Strategy<Value = Vec<(String, Vec<String>)>> {
    prop::collection::vec(
        (
            "[a-z]{3,8}",
            prop::collection::vec("[a-zA-Z0-9 éü日本語]{0,24}", 0..6),
        ),
        1..6,
    )
}

fn build(chapters: &[(String, Vec<String>)], with_toc: bool) -> Vec<u8> {
    let mut book = Book::new();
    for (i, (word, paragraphs)) in chapters.iter().enumerate() {
        let id = format!("ch{}", i + 1);
        let title = format!("Chapter {} {}", i + 1, word);
        let body = paragraphs
            .iter()
            .map(|paragraph| format!("<p>{}</p>", paragraph))
            .collect::<String>();

        book = book.chapter(&id, format!("<h1>{}</h1>{}", title, body));
        if with_toc {
            book = book.toc_entry(&title, &format!("{}.xhtml", id));
        }
    }
    book.build()
}

fn options(mode: u8) -> ConvertOptions {
    let options = ConvertOptions::default();
    match mode {
        1 => options.with_post_processing(PostProcessing::new(
            BlankLineRemover,
            PostProcessMode::PerSegment,
        )),
        2 => options.with_post_processing(PostProcessing::new(
            BlankLineRemover,
            PostProcessMode::WholeText,
        )),
        _ => options,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn index_positions_are_char_boundaries(chapters in chapters(), mode in 0u8..3) {
        let conversion = Converter::new(options(mode))
            .convert_reader(Cursor::new(build(&chapters, true)))
            .unwrap();

        for entry in conversion.index.as_ref().unwrap() {
            prop_assert!(entry.byte_pos <= conversion.text.len());
            prop_assert!(conversion.text.is_char_boundary(entry.byte_pos));
            prop_assert!(!is_directory_title(&entry.title));
        }
    }

    #[test]
    fn chapter_starts_are_monotonic(chapters in chapters(), mode in 0u8..3) {
        let conversion = Converter::new(options(mode))
            .convert_reader(Cursor::new(build(&chapters, true)))
            .unwrap();

        for pair in conversion.chapters.windows(2) {
            prop_assert!(pair[0].start <= pair[1].start);
        }
        for chapter in &conversion.chapters {
            prop_assert!(conversion.text.is_char_boundary(chapter.start));
        }
    }

    #[test]
    fn segments_add_up_to_text(chapters in chapters(), mode in 0u8..3, with_toc in any::<bool>()) {
        let conversion = Converter::new(options(mode))
            .convert_reader(Cursor::new(build(&chapters, with_toc)))
            .unwrap();

        let total = conversion.segments.iter().map(|segment| segment.byte_len()).sum::<usize>();
        prop_assert_eq!(total, conversion.total_bytes());
        prop_assert_eq!(
            conversion.segments.iter().map(|segment| segment.text.as_str()).collect::<String>(),
            conversion.text.clone()
        );
    }

    #[test]
    fn trimming_is_idempotent(chapters in chapters()) {
        let conversion = Converter::new(ConvertOptions::default())
            .convert_reader(Cursor::new(build(&chapters, true)))
            .unwrap();

        let index = conversion.index.as_ref().unwrap();
        prop_assert_eq!(index[0].byte_pos, 0);
        prop_assert_eq!(trim_amount(&conversion.text, index[0].byte_pos), 0);
    }

    #[test]
    fn trim_amount_lands_on_boundaries(text in "[a-z 目录\n]{0,40}", target in 0usize..60) {
        let amount = trim_amount(&text, target);
        prop_assert!(amount <= text.len());
        prop_assert!(text.is_char_boundary(amount));
        prop_assert_eq!(trim_amount(&text[amount..], 0), 0);
    }
}
