//! EPUB to text library
//!
//! A Rust library for converting EPUB publications into plain text together
//! with a byte-accurate index of the table of contents.
//!
//! The conversion reads the package document and the navigation data of an
//! EPUB 2 or EPUB 3 publication, decides for every spine document whether it
//! is ordinary content, a standalone table of contents or a chapter with an
//! embedded contents block, extracts the visible text and records where every
//! table of contents entry starts in the final text, in bytes.
//!
//! ## Features
//!
//! - Parse the EPUB container, package document, NCX and navigation document.
//! - Classify table-of-contents pages and strip embedded contents blocks.
//! - Extract visible text, honoring stylesheets that hide content.
//! - Keep index positions aligned to UTF-8 boundaries through trimming and
//!   post-processing.
//! - Process chapters in parallel with a deterministic result.
//!
//! ## Quick Start
//!
//! ```rust, ignore
//! # use epub_txt::{config::ConvertOptions, convert::Converter};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let converter = Converter::new(ConvertOptions::default());
//! let conversion = converter.convert_file("path/to/epub/file.epub")?;
//!
//! println!("{} bytes of text", conversion.total_bytes());
//! if let Some(index) = conversion.render_index() {
//!     println!("{}", index);
//! }
//!
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! - `cli` (default): builds the `epub2txt` command-line tool. Library users
//!   can turn it off with `default-features = false` to drop `clap` and
//!   `env_logger`.

pub mod assemble;
pub mod classify;
pub mod config;
pub mod convert;
pub mod epub;
pub mod error;
pub mod extract;
pub mod index;
pub mod offset;
pub mod postprocess;
pub mod style;
pub mod toc;
pub mod types;
pub mod utils;

#[cfg(test)]
mod fixture;

pub use config::{CancelToken, ConvertOptions, PostProcessMode, PostProcessing};
pub use convert::{Conversion, Converter, convert_file};
pub use error::EpubError;
pub use postprocess::{BlankLineRemover, PostProcessor};
pub use utils::DecodeBytes;
