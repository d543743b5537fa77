//! Conversion options
//!
//! Everything that tunes a conversion run lives in [`ConvertOptions`], which is
//! passed explicitly to every stage; there is no global state.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use log::Level;

use crate::postprocess::PostProcessor;

/// Default distance within which a title match may replace a computed position
pub const DEFAULT_DRIFT_WINDOW: usize = 64 * 1024;

/// Default largest leading offset treated as an invisible-marker leftover
pub const DEFAULT_RESIDUAL_LIMIT: usize = 6;

/// The tuned constants of the page classifier
///
/// The defaults are empirically chosen and should be changed with care: they
/// decide which chapters disappear from the output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierThresholds {
    /// Minimum links of an explicit `nav` block for a standalone TOC page
    pub nav_min_links: usize,
    pub nav_min_ratio: f64,
    pub nav_max_other_len: usize,

    /// Minimum links of a heading-introduced TOC without `nav` markup
    pub heading_min_links: usize,
    pub heading_min_ratio: f64,
    pub heading_max_other_len: usize,

    /// Minimum links next to a directory heading inside a contents container
    pub container_min_links: usize,

    /// Pages with fewer links than this are checked line by line
    pub sparse_max_links: usize,
    pub title_scan_lines: usize,
    pub title_min_matches: usize,
    pub title_min_density: f64,
    pub title_max_body_len: usize,

    /// Minimum links in a navigation context for a mixed page
    pub mixed_min_links: usize,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            nav_min_links: 10,
            nav_min_ratio: 0.6,
            nav_max_other_len: 800,
            heading_min_links: 5,
            heading_min_ratio: 0.5,
            heading_max_other_len: 800,
            container_min_links: 3,
            sparse_max_links: 3,
            title_scan_lines: 120,
            title_min_matches: 5,
            title_min_density: 0.5,
            title_max_body_len: 15000,
            mixed_min_links: 5,
        }
    }
}

/// Where a post-processor is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostProcessMode {
    /// Once per chapter segment, before chapter offsets are reconciled
    #[default]
    PerSegment,

    /// Once over the assembled and trimmed text
    WholeText,
}

/// A post-processor together with the way it is applied
#[derive(Clone)]
pub struct PostProcessing {
    pub processor: Arc<dyn PostProcessor>,
    pub mode: PostProcessMode,
}

impl PostProcessing {
    pub fn new<P: PostProcessor + 'static>(processor: P, mode: PostProcessMode) -> Self {
        Self {
            processor: Arc::new(processor),
            mode,
        }
    }
}

impl fmt::Debug for PostProcessing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostProcessing")
            .field("processor", &self.processor.name())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Options of a conversion run
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Build the TOC index
    pub emit_index: bool,

    /// Look for a cover image
    pub extract_cover: bool,

    pub post_processing: Option<PostProcessing>,

    /// Classify and extract chapters on the rayon thread pool
    pub parallel: bool,

    /// Log classification metrics and trim decisions at info level
    pub debug: bool,

    pub drift_window: usize,
    pub residual_limit: usize,
    pub thresholds: ClassifierThresholds,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            emit_index: true,
            extract_cover: false,
            post_processing: None,
            parallel: true,
            debug: false,
            drift_window: DEFAULT_DRIFT_WINDOW,
            residual_limit: DEFAULT_RESIDUAL_LIMIT,
            thresholds: ClassifierThresholds::default(),
        }
    }
}

impl ConvertOptions {
    pub fn with_index(mut self, emit_index: bool) -> Self {
        self.emit_index = emit_index;
        self
    }

    pub fn with_cover(mut self, extract_cover: bool) -> Self {
        self.extract_cover = extract_cover;
        self
    }

    pub fn with_post_processing(mut self, post_processing: PostProcessing) -> Self {
        self.post_processing = Some(post_processing);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_drift_window(mut self, drift_window: usize) -> Self {
        self.drift_window = drift_window;
        self
    }

    pub fn with_residual_limit(mut self, residual_limit: usize) -> Self {
        self.residual_limit = residual_limit;
        self
    }

    pub fn with_thresholds(mut self, thresholds: ClassifierThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Log level for per-chapter diagnostics
    pub fn diagnostic_level(&self) -> Level {
        if self.debug { Level::Info } else { Level::Debug }
    }
}

/// Cooperative cancellation flag shared between a caller and a running conversion
///
/// The conversion checks the flag once per chapter and stops with
/// [`EpubError::Cancelled`](crate::error::EpubError::Cancelled).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
