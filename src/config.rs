//! Configuration for a re-OCR run.
//!
//! All run behaviour is controlled through [`RunConfig`], built via its
//! [`RunConfigBuilder`]. Keeping every knob in one struct makes it trivial
//! to share a config across workers and to diff two runs to understand why
//! their outcomes differ.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::error::ReocrError;
use crate::inference::TranscriptionEngine;
use crate::pipeline::render::PageRenderer;
use crate::progress::ProgressCallback;
use crate::store::{DocumentId, DocumentStore, TagId};

/// Which documents a run selects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Every document not yet carrying the `done` tag (default).
    #[default]
    Pending,
    /// One specific document.
    Single(DocumentId),
    /// Every document carrying the given tag.
    TagGroup(TagId),
    /// The ids recorded in the dead-letter queue.
    RetryFailed,
}

/// Separator inserted between page transcripts in the assembled text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PageSeparator {
    /// Pages joined with a blank line. (default)
    #[default]
    Blank,
    /// A dashed rule between pages.
    Rule,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    pub fn render(&self) -> String {
        match self {
            PageSeparator::Blank => "\n\n".to_string(),
            PageSeparator::Rule => "\n\n----\n\n".to_string(),
            PageSeparator::Custom(s) => format!("\n\n{s}\n\n"),
        }
    }
}

/// Configuration for a run.
///
/// Built via [`RunConfig::builder()`].
///
/// # Example
/// ```rust
/// use paperless_reocr::RunConfig;
///
/// let config = RunConfig::builder()
///     .store_url("http://paperless.local:8000")
///     .store_token("s3cret")
///     .done_tag(1065)
///     .failed_tag(1066)
///     .workers(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct RunConfig {
    /// Base URL of the document store.
    pub store_url: String,

    /// Bearer token for the document store.
    pub store_token: String,

    /// Generate endpoint of the local vision model,
    /// e.g. `http://localhost:11434/api/generate`.
    pub inference_url: String,

    /// Vision model identifier. Default: `minicpm-v:latest`.
    pub model: String,

    /// Tag marking a successfully re-OCRed document. Required.
    pub done_tag: TagId,

    /// Tag marking a document whose processing failed. Required.
    pub failed_tag: TagId,

    /// Document selection mode. Default: [`SelectionMode::Pending`].
    pub mode: SelectionMode,

    /// Process documents even when they already carry the `done` tag.
    pub force: bool,

    /// Number of documents processed concurrently. Default: the machine's
    /// core count.
    ///
    /// Each worker owns one document end-to-end, so memory stays bounded
    /// to O(workers) documents in flight regardless of store size.
    pub workers: usize,

    /// Transcribe at most this many leading pages per document.
    /// Default: no limit.
    ///
    /// Long documents dominate wall-clock time; most filing workflows only
    /// need the first pages searchable. When pages are skipped the
    /// assembled text notes how many were transcribed.
    pub page_limit: Option<usize>,

    /// Maximum rendered page dimension (width or height) in pixels.
    /// Default: 2000.
    ///
    /// A safety cap independent of page size: an A0 scan could otherwise
    /// rasterise to a pixel buffer in the hundreds of megabytes. Either
    /// dimension is capped, the other scales proportionally.
    pub max_rendered_pixels: u32,

    /// Directory for the content-addressed page cache.
    /// Default: `./reocr_cache`.
    pub cache_dir: PathBuf,

    /// Path of the dead-letter queue file. Default: `./reocr_failed.tsv`.
    pub dlq_path: PathBuf,

    /// Explicit transcription prompt. Overrides the prompt file.
    pub prompt: Option<String>,

    /// Operator-editable prompt file. Default: `./prompt.md`.
    pub prompt_file: PathBuf,

    /// Separator between page transcripts. Default: blank line.
    pub page_separator: PageSeparator,

    /// Maximum retry attempts for a transient remote failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff).
    /// Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s. Exponential backoff
    /// avoids a thundering herd where N workers retry simultaneously
    /// against a recovering endpoint.
    pub retry_backoff_ms: u64,

    /// Per-request timeout for store calls in seconds. Default: 30.
    pub store_timeout_secs: u64,

    /// Per-page timeout for inference calls in seconds. Default: 300.
    ///
    /// Local vision models routinely take tens of seconds per page on CPU;
    /// a conventional HTTP timeout would fail every page.
    pub inference_timeout_secs: u64,

    /// Pre-constructed document store. Takes precedence over
    /// `store_url`/`store_token`. The injection seam used by tests.
    pub store: Option<Arc<dyn DocumentStore>>,

    /// Pre-constructed transcription engine. Takes precedence over
    /// `inference_url`/`model`.
    pub engine: Option<Arc<dyn TranscriptionEngine>>,

    /// Pre-constructed page renderer. Defaults to the pdfium renderer.
    pub renderer: Option<Arc<dyn PageRenderer>>,

    /// Progress event sink for dashboards.
    pub progress_callback: Option<ProgressCallback>,

    /// Cooperative stop flag. Once set, no further documents are
    /// dispatched; in-flight documents finish and commit normally.
    pub stop: Arc<AtomicBool>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            store_url: String::new(),
            store_token: String::new(),
            inference_url: "http://localhost:11434/api/generate".to_string(),
            model: "minicpm-v:latest".to_string(),
            done_tag: 0,
            failed_tag: 0,
            mode: SelectionMode::default(),
            force: false,
            workers: num_cpus::get().max(1),
            page_limit: None,
            max_rendered_pixels: 2000,
            cache_dir: PathBuf::from("./reocr_cache"),
            dlq_path: PathBuf::from("./reocr_failed.tsv"),
            prompt: None,
            prompt_file: PathBuf::from("./prompt.md"),
            page_separator: PageSeparator::default(),
            max_retries: 3,
            retry_backoff_ms: 500,
            store_timeout_secs: 30,
            inference_timeout_secs: 300,
            store: None,
            engine: None,
            renderer: None,
            progress_callback: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("store_url", &self.store_url)
            .field("store_token", &"<redacted>")
            .field("inference_url", &self.inference_url)
            .field("model", &self.model)
            .field("done_tag", &self.done_tag)
            .field("failed_tag", &self.failed_tag)
            .field("mode", &self.mode)
            .field("force", &self.force)
            .field("workers", &self.workers)
            .field("page_limit", &self.page_limit)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("cache_dir", &self.cache_dir)
            .field("dlq_path", &self.dlq_path)
            .field("max_retries", &self.max_retries)
            .field("store", &self.store.as_ref().map(|_| "<dyn DocumentStore>"))
            .field(
                "engine",
                &self.engine.as_ref().map(|_| "<dyn TranscriptionEngine>"),
            )
            .finish()
    }
}

impl RunConfig {
    /// Create a new builder for `RunConfig`.
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`RunConfig`].
#[derive(Debug)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn store_url(mut self, url: impl Into<String>) -> Self {
        self.config.store_url = url.into();
        self
    }

    pub fn store_token(mut self, token: impl Into<String>) -> Self {
        self.config.store_token = token.into();
        self
    }

    pub fn inference_url(mut self, url: impl Into<String>) -> Self {
        self.config.inference_url = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn done_tag(mut self, tag: TagId) -> Self {
        self.config.done_tag = tag;
        self
    }

    pub fn failed_tag(mut self, tag: TagId) -> Self {
        self.config.failed_tag = tag;
        self
    }

    pub fn mode(mut self, mode: SelectionMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.config.force = force;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn page_limit(mut self, limit: Option<usize>) -> Self {
        self.config.page_limit = limit;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn dlq_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dlq_path = path.into();
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn prompt_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.prompt_file = path.into();
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn store_timeout_secs(mut self, secs: u64) -> Self {
        self.config.store_timeout_secs = secs;
        self
    }

    pub fn inference_timeout_secs(mut self, secs: u64) -> Self {
        self.config.inference_timeout_secs = secs;
        self
    }

    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.config.store = Some(store);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn TranscriptionEngine>) -> Self {
        self.config.engine = Some(engine);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.config.renderer = Some(renderer);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.config.stop = stop;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RunConfig, ReocrError> {
        let c = &self.config;
        if c.workers == 0 {
            return Err(ReocrError::InvalidConfig("workers must be ≥ 1".into()));
        }
        if c.done_tag == 0 {
            return Err(ReocrError::InvalidConfig(
                "done tag id is not configured (set TAG_ID or .done_tag())".into(),
            ));
        }
        if c.failed_tag == 0 {
            return Err(ReocrError::InvalidConfig(
                "failed tag id is not configured (set FAILED_TAG_ID or .failed_tag())".into(),
            ));
        }
        if c.done_tag == c.failed_tag {
            return Err(ReocrError::InvalidConfig(format!(
                "done and failed tags must differ, both are {}",
                c.done_tag
            )));
        }
        if c.store.is_none() && (c.store_url.is_empty() || c.store_token.is_empty()) {
            return Err(ReocrError::InvalidConfig(
                "store URL and token are required (set PAPERLESS_URL and PAPERLESS_TOKEN)".into(),
            ));
        }
        if let Some(0) = c.page_limit {
            return Err(ReocrError::InvalidConfig(
                "page limit of 0 would transcribe nothing".into(),
            ));
        }
        Ok(self.config)
    }
}
