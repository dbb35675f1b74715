//! Per-document unit of work.
//!
//! One document moves through `AcquiringPages → Transcribing → Assembling`
//! and ends `Done` or `Failed`. The first failing stage short-circuits the
//! rest: a document with one unreadable page is retried whole on a later
//! run instead of being committed with missing content.
//!
//! Pages are transcribed strictly in page order with one page in flight per
//! document — reading order is preserved in the assembled text, memory
//! stays bounded to one page image, and a failing page is noticed before
//! later pages burn inference time. Parallelism across documents is the
//! worker pool's job.

use tracing::{debug, info, warn};

use crate::cache::CacheKey;
use crate::error::{DocumentFailure, FailureKind};
use crate::pipeline::{cleanup, ocr};
use crate::run::RunContext;
use crate::store::DocumentRef;

/// Terminal result of one pipeline pass over one document.
///
/// Produced exactly once per document per run and consumed exactly once by
/// the committer.
#[derive(Debug)]
pub struct DocumentResult {
    pub doc: DocumentRef,
    pub outcome: Outcome,
}

#[derive(Debug)]
pub enum Outcome {
    /// Assembled transcript ready to commit.
    Success {
        text: String,
        /// Pages actually transcribed (≤ the document's page count under a
        /// page limit).
        pages: usize,
    },
    Failure(DocumentFailure),
}

/// Run the pipeline for one document.
///
/// Never returns an error: every failure is folded into the result for the
/// committer to record.
pub async fn process_document(ctx: &RunContext, doc: DocumentRef) -> DocumentResult {
    let key = CacheKey::for_document(&doc);
    debug!("processing document {} '{}'", doc.id, doc.title);

    // ── Acquire pages ────────────────────────────────────────────────────
    let pages = ctx
        .cache
        .get_or_render(&key, || async move {
            let bytes = ctx.store.download_original(doc.id).await.map_err(|e| {
                DocumentFailure::new(doc.id, FailureKind::Acquisition, format!("download: {e}"))
            })?;
            debug!("downloaded {} bytes for document {}", bytes.len(), doc.id);
            ctx.renderer.rasterize(bytes).await.map_err(|e| {
                DocumentFailure::new(doc.id, FailureKind::Acquisition, format!("rasterise: {e}"))
            })
        })
        .await;

    let pages = match pages {
        Ok(p) => p,
        Err(failure) => return failed(doc, failure),
    };
    ctx.cache.sweep_orphans(&key).await;

    if pages.images.is_empty() {
        let failure = DocumentFailure::new(
            doc.id,
            FailureKind::Acquisition,
            "document rendered to zero pages",
        );
        return failed(doc, failure);
    }

    // ── Transcribe, in page order ────────────────────────────────────────
    let mut transcripts = Vec::with_capacity(pages.images.len());
    for (idx, image) in pages.images.iter().enumerate() {
        let page_num = idx + 1;
        match ocr::transcribe_page(
            &ctx.engine,
            page_num,
            image,
            ctx.config.max_retries,
            ctx.config.retry_backoff_ms,
        )
        .await
        {
            Ok(t) => transcripts.push(t),
            Err(e) => {
                let failure = DocumentFailure::new(
                    doc.id,
                    FailureKind::Inference,
                    format!("page {page_num}: {e}"),
                );
                return failed(doc, failure);
            }
        }
    }

    // ── Assemble ─────────────────────────────────────────────────────────
    let separator = ctx.config.page_separator.render();
    let mut text = transcripts
        .iter()
        .map(|t| cleanup::clean_transcript(&t.text))
        .collect::<Vec<_>>()
        .join(&separator);

    if pages.images.len() < pages.total_pages {
        text.push_str(&separator);
        text.push_str(&format!(
            "--- {} of {} pages transcribed ---",
            pages.images.len(),
            pages.total_pages
        ));
    }
    let text = cleanup::ensure_final_newline(&text);

    info!(
        "document {} transcribed: {} pages, {} chars",
        doc.id,
        transcripts.len(),
        text.len()
    );

    DocumentResult {
        outcome: Outcome::Success {
            text,
            pages: transcripts.len(),
        },
        doc,
    }
}

fn failed(doc: DocumentRef, failure: DocumentFailure) -> DocumentResult {
    warn!("{failure}");
    DocumentResult {
        doc,
        outcome: Outcome::Failure(failure),
    }
}
