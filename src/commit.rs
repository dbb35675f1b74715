//! Outcome committer: apply a document's terminal state to the store.
//!
//! Exactly one of `done` / `failed` holds after a commit, never both. The
//! tag calls are ordered so a concurrent observer never sees a document
//! carrying both workflow tags at once: the new state is added first, the
//! old one removed second.
//!
//! Remote side effects are retried inside the store client; once a success
//! commit still fails, the document itself is converted to the failure
//! path. The dead-letter append is local and is attempted even when the
//! remote half of recording a failure did not go through — the DLQ must
//! not depend on the store being reachable.

use tracing::{error, info, warn};

use crate::error::{DocumentFailure, FailureKind, StoreError};
use crate::pipeline::document::{DocumentResult, Outcome};
use crate::run::RunContext;
use crate::store::DocumentRef;

/// Terminal tag state applied to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Done,
    Failed,
}

/// Commit one pipeline result and record it in the run progress.
pub async fn commit_outcome(ctx: &RunContext, result: DocumentResult) -> CommitState {
    let DocumentResult { doc, outcome } = result;
    match outcome {
        Outcome::Success { text, pages } => match commit_success(ctx, &doc, &text).await {
            Ok(()) => {
                info!("document {} committed as done ({} pages)", doc.id, pages);
                ctx.progress.document_done(doc.id, pages);
                CommitState::Done
            }
            Err(e) => {
                let failure =
                    DocumentFailure::new(doc.id, FailureKind::Commit, e.to_string());
                warn!("{failure}");
                commit_failure(ctx, &doc, &failure).await;
                CommitState::Failed
            }
        },
        Outcome::Failure(failure) => {
            commit_failure(ctx, &doc, &failure).await;
            CommitState::Failed
        }
    }
}

/// Push the text, then add `done`, then remove `failed`.
async fn commit_success(
    ctx: &RunContext,
    doc: &DocumentRef,
    text: &str,
) -> Result<(), StoreError> {
    ctx.store.update_content(doc.id, text).await?;
    ctx.store.add_tag(doc.id, ctx.config.done_tag).await?;
    ctx.store.remove_tag(doc.id, ctx.config.failed_tag).await?;
    Ok(())
}

/// Add `failed`, remove `done`, append the dead-letter record.
///
/// The remote calls are best-effort here — the document is already known
/// failed and the run must continue — but the local append is the source
/// of truth for the retry run and its failure is an operator-visible
/// error.
async fn commit_failure(ctx: &RunContext, doc: &DocumentRef, failure: &DocumentFailure) {
    if let Err(e) = ctx.store.add_tag(doc.id, ctx.config.failed_tag).await {
        warn!("document {}: could not add failed tag: {}", doc.id, e);
    }
    // A force or retry run can fail a document that carries `done` from an
    // earlier run; the exclusivity invariant requires dropping it.
    if let Err(e) = ctx.store.remove_tag(doc.id, ctx.config.done_tag).await {
        warn!("document {}: could not remove done tag: {}", doc.id, e);
    }

    let reason = format!("{}: {}", failure.kind, failure.detail);
    if let Err(e) = ctx.dlq.append(doc.id, &reason).await {
        error!(
            "document {}: dead-letter append failed, id will not be retried automatically: {}",
            doc.id, e
        );
    }

    ctx.progress.document_failed(doc.id, &reason);
}
