//! epub2txt - Convert EPUB publications into plain text with a TOC index

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::Parser;
use log::{error, info};

use epub_txt::{
    BlankLineRemover, ConvertOptions, Converter, EpubError, PostProcessMode, PostProcessing,
};

#[derive(Parser, Debug)]
#[command(name = "epub2txt")]
#[command(version, about = "Convert EPUB files to plain text with a byte-accurate TOC index", long_about = None)]
#[command(after_help = "EXAMPLES:
    epub2txt book.epub                  Write book.txt and book.idx next to book.epub
    epub2txt -o out --cover a.epub b.epub
                                        Convert two books into out/, with covers")]
struct Cli {
    /// EPUB files to convert
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// Directory for the output files (defaults to each input's directory)
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Do not write the .idx file
    #[arg(long)]
    no_index: bool,

    /// Extract the cover image
    #[arg(short, long)]
    cover: bool,

    /// Remove whitespace-only lines from the text
    #[arg(long)]
    remove_blank_lines: bool,

    /// Post-process the whole text at once instead of chapter by chapter
    #[arg(long, requires = "remove_blank_lines")]
    whole_text: bool,

    /// Process chapters on a single thread
    #[arg(long)]
    sequential: bool,

    /// Log classification details
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    fn options(&self) -> ConvertOptions {
        let mut options = ConvertOptions::default()
            .with_index(!self.no_index)
            .with_cover(self.cover)
            .with_parallel(!self.sequential)
            .with_debug(self.debug);

        if self.remove_blank_lines {
            let mode = if self.whole_text {
                PostProcessMode::WholeText
            } else {
                PostProcessMode::PerSegment
            };
            options = options.with_post_processing(PostProcessing::new(BlankLineRemover, mode));
        }

        options
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .target(env_logger::Target::Stderr)
        .init();

    let converter = Converter::new(cli.options());
    let mut failed = 0;
    for input in &cli.inputs {
        if let Err(err) = convert(&converter, input, cli.output_dir.as_deref()) {
            error!("{}: {}", input.display(), err);
            failed += 1;
        }
    }

    if failed > 0 {
        eprintln!("error: {} of {} conversions failed", failed, cli.inputs.len());
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn convert(converter: &Converter, input: &Path, output_dir: Option<&Path>) -> Result<(), EpubError> {
    let conversion = converter.convert_file(input)?;

    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_string());
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();

    let written = conversion.write_to_dir(&dir, &stem)?;
    for path in &written {
        info!("Wrote {}", path.display());
    }

    println!("File: {}", input.display());
    if let Some(title) = &conversion.title {
        println!("Title: {}", title);
    }
    println!("Chapters: {}", conversion.chapters.len());
    println!(
        "Standalone contents pages: {}",
        conversion.standalone_chapters().count()
    );
    if let Some(index) = &conversion.index {
        println!("Index entries: {}", index.len());
    }
    println!("Text: {} bytes", conversion.total_bytes());
    if converter.options().post_processing.is_some() {
        println!("Post-processing: {}", conversion.stats);
    }

    Ok(())
}
