//! # paperless-reocr
//!
//! Re-OCR the documents in a Paperless store with a local vision language
//! model.
//!
//! ## Why this crate?
//!
//! The OCR a document store runs at ingest time (typically tesseract over a
//! flattened scan) garbles stamps, handwriting, multi-column layouts, and
//! low-contrast receipts. A vision language model reads the page as a human
//! would. This crate walks the store, rasterises each document's pages,
//! transcribes them with the model, and writes the improved text and a
//! workflow tag back — unattended, resumable, over thousands of documents.
//!
//! ## Pipeline Overview
//!
//! ```text
//! store listing
//!  │
//!  ├─ 1. Select   paginated enumeration, deduplicated, done-tag filtered
//!  ├─ 2. Acquire  content-addressed page cache, pdfium render on miss
//!  ├─ 3. OCR      one page at a time per document, N documents in parallel
//!  ├─ 4. Assemble page transcripts joined in reading order
//!  └─ 5. Commit   text + `done` tag, or `failed` tag + dead-letter record
//! ```
//!
//! Runs are idempotent: committed documents carry the `done` tag and the
//! default selection excludes them, so re-running after an interruption
//! picks up exactly the remainder. Failed documents carry the `failed` tag
//! and their ids accumulate in a dead-letter file consumed by
//! `--retry-failed`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paperless_reocr::{run, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfig::builder()
//!         .store_url("http://paperless.local:8000")
//!         .store_token(std::env::var("PAPERLESS_TOKEN")?)
//!         .done_tag(1065)
//!         .failed_tag(1066)
//!         .build()?;
//!     let summary = run(config).await?;
//!     println!("{} done, {} failed", summary.done, summary.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `reocr` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! paperless-reocr = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod commit;
pub mod config;
pub mod dlq;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod run;
pub mod selector;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheKey, PageCache, PageSet};
pub use commit::CommitState;
pub use config::{PageSeparator, RunConfig, RunConfigBuilder, SelectionMode};
pub use dlq::DeadLetterQueue;
pub use error::{DocumentFailure, FailureKind, ReocrError};
pub use inference::{OllamaClient, TranscriptionEngine};
pub use pipeline::render::{PageRenderer, PdfiumRenderer};
pub use progress::{
    NoopProgressCallback, ProgressCallback, RunProgressCallback, RunSummary,
};
pub use run::{run, RunContext};
pub use selector::{DocumentStream, Selection};
pub use store::{
    DocumentId, DocumentPage, DocumentRef, DocumentStore, ListFilter, PaperlessClient, TagId,
};
