//! Run orchestration: wire the selector to a bounded worker pool.
//!
//! The selector's stream is pulled through `buffer_unordered(workers)`, so
//! at most N documents are in flight and the listing is only paginated as
//! fast as workers free up — backpressure keeps memory at O(workers)
//! documents regardless of store size.
//!
//! Run-scoped state (clients, cache, dead-letter queue, progress counters,
//! stop flag) lives in one [`RunContext`] passed to every worker rather
//! than in process-wide globals, so the pipeline stays unit-testable and
//! reentrant.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future;
use futures::stream::StreamExt;
use tracing::{info, warn};

use crate::cache::PageCache;
use crate::commit;
use crate::config::{RunConfig, SelectionMode};
use crate::dlq::DeadLetterQueue;
use crate::error::ReocrError;
use crate::inference::{OllamaClient, TranscriptionEngine};
use crate::pipeline::document::process_document;
use crate::pipeline::render::{PageRenderer, PdfiumRenderer};
use crate::progress::{NoopProgressCallback, RunProgress, RunSummary};
use crate::prompts;
use crate::selector::{document_stream, Selection};
use crate::store::{DocumentStore, PaperlessClient};

/// Everything a worker needs, shared across the pool.
pub struct RunContext {
    pub config: RunConfig,
    pub store: Arc<dyn DocumentStore>,
    pub engine: Arc<dyn TranscriptionEngine>,
    pub renderer: Arc<dyn PageRenderer>,
    pub cache: PageCache,
    pub dlq: DeadLetterQueue,
    pub progress: Arc<RunProgress>,
}

impl RunContext {
    /// Build the context, constructing default clients for any seam the
    /// configuration did not inject.
    pub fn new(config: RunConfig) -> Result<Self, ReocrError> {
        let store: Arc<dyn DocumentStore> = match &config.store {
            Some(store) => Arc::clone(store),
            None => Arc::new(PaperlessClient::new(
                &config.store_url,
                &config.store_token,
                config.store_timeout_secs,
                config.max_retries,
                config.retry_backoff_ms,
            )?),
        };

        let engine: Arc<dyn TranscriptionEngine> = match &config.engine {
            Some(engine) => Arc::clone(engine),
            None => {
                let prompt =
                    prompts::resolve_prompt(config.prompt.as_deref(), &config.prompt_file);
                Arc::new(
                    OllamaClient::new(
                        &config.inference_url,
                        &config.model,
                        &prompt,
                        config.inference_timeout_secs,
                    )
                    .map_err(|e| ReocrError::Internal(format!("inference client: {e}")))?,
                )
            }
        };

        let renderer: Arc<dyn PageRenderer> = match &config.renderer {
            Some(renderer) => Arc::clone(renderer),
            None => Arc::new(PdfiumRenderer::new(
                config.max_rendered_pixels,
                config.page_limit,
            )),
        };

        let cache = PageCache::new(&config.cache_dir, config.page_limit);
        let dlq = DeadLetterQueue::new(&config.dlq_path);
        let callback = config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));
        let progress = Arc::new(RunProgress::new(callback));

        Ok(Self {
            config,
            store,
            engine,
            renderer,
            cache,
            dlq,
            progress,
        })
    }
}

/// Execute one run to completion.
///
/// Returns `Ok` whenever enumeration completed, even if individual
/// documents failed — failed ids carry the `failed` tag and sit in the
/// dead-letter queue. Only configuration and enumeration problems are
/// `Err`.
pub async fn run(config: RunConfig) -> Result<RunSummary, ReocrError> {
    let ctx = Arc::new(RunContext::new(config)?);

    let selection = match ctx.config.mode.clone() {
        SelectionMode::Pending => Selection::Pending,
        SelectionMode::Single(id) => Selection::Single(id),
        SelectionMode::TagGroup(tag) => Selection::TagGroup(tag),
        SelectionMode::RetryFailed => {
            // Drain eagerly: ids failing again are re-appended to the now
            // empty file instead of accumulating duplicates.
            let ids = ctx.dlq.drain().await.map_err(|e| ReocrError::DlqRead {
                path: ctx.config.dlq_path.clone(),
                source: e,
            })?;
            info!("retrying {} documents from the dead-letter queue", ids.len());
            Selection::Retry(ids)
        }
    };

    info!(
        "starting run: mode={:?} force={} workers={}",
        ctx.config.mode, ctx.config.force, ctx.config.workers
    );

    let stop = Arc::clone(&ctx.config.stop);
    let documents = document_stream(
        Arc::clone(&ctx.store),
        selection,
        ctx.config.force,
        ctx.config.done_tag,
        Arc::clone(&ctx.progress),
    )
    // A requested stop ends dispatch; documents already in flight finish
    // and commit normally, so no partial result is ever written.
    .take_while(move |_| future::ready(!stop.load(Ordering::SeqCst)));

    let workers = ctx.config.workers;
    let mut outcomes = documents
        .map(|item| {
            let ctx = Arc::clone(&ctx);
            async move {
                let doc = match item {
                    Ok(doc) => doc,
                    Err(e) => return Err(e),
                };
                ctx.progress.document_started(doc.id, &doc.title);
                let result = process_document(&ctx, doc).await;
                commit::commit_outcome(&ctx, result).await;
                Ok(())
            }
        })
        .buffer_unordered(workers);

    while let Some(outcome) = outcomes.next().await {
        outcome?;
    }
    drop(outcomes);

    if ctx.config.stop.load(Ordering::SeqCst) {
        warn!("run stopped before the candidate set was exhausted");
    }

    let summary = ctx.progress.run_complete();
    info!(
        "run complete: {} done, {} failed, {} skipped{}",
        summary.done,
        summary.failed,
        summary.skipped,
        summary
            .total
            .map(|t| format!(" (of {t})"))
            .unwrap_or_default()
    );
    Ok(summary)
}
