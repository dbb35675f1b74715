//! Document selection: turn an operator's selection mode into a lazy,
//! finite, non-repeating stream of document snapshots.
//!
//! The stream walks the store's paginated listing to exhaustion — it never
//! assumes the candidate set fits in one response page. Remote mutation
//! while a run is in flight can shift pagination windows, so the stream
//! keeps a run-scoped set of already-yielded ids and drops duplicates.
//!
//! Listing failures are retried inside the store client; an error that
//! reaches this module has exhausted its retries and aborts the run as
//! [`ReocrError::Enumeration`] — partial enumeration is never silently
//! accepted.

use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::sync::Arc;

use futures::future;
use futures::stream::{self, StreamExt};
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::error::{ReocrError, StoreError};
use crate::progress::RunProgress;
use crate::store::{DocumentId, DocumentRef, DocumentStore, ListFilter, TagId};

/// A boxed stream of document snapshots; the worker pool pulls it only as
/// fast as workers free up.
pub type DocumentStream = Pin<Box<dyn Stream<Item = Result<DocumentRef, ReocrError>> + Send>>;

/// Resolved selection for one run.
///
/// [`Selection::Retry`] carries the ids already drained from the
/// dead-letter queue; it always behaves as forced.
#[derive(Debug, Clone)]
pub enum Selection {
    Pending,
    Single(DocumentId),
    TagGroup(TagId),
    Retry(Vec<DocumentId>),
}

impl Selection {
    /// Retry selections bypass the done-tag filter regardless of `--force`.
    pub fn is_forced(&self, force_flag: bool) -> bool {
        force_flag || matches!(self, Selection::Retry(_))
    }
}

fn enumeration(e: StoreError) -> ReocrError {
    ReocrError::Enumeration {
        detail: e.to_string(),
    }
}

/// Build the document stream for `selection`.
///
/// `progress` learns the candidate total as soon as it is known: from the
/// first listing page, or immediately for single/retry selections.
pub fn document_stream(
    store: Arc<dyn DocumentStore>,
    selection: Selection,
    force: bool,
    done_tag: TagId,
    progress: Arc<RunProgress>,
) -> DocumentStream {
    let forced = selection.is_forced(force);
    match selection {
        Selection::Single(id) => single_stream(store, id, forced, done_tag, progress),
        Selection::Retry(ids) => retry_stream(store, ids, progress),
        Selection::Pending => {
            let filter = ListFilter {
                exclude_tag: (!forced).then_some(done_tag),
                require_tag: None,
            };
            listing_stream(store, filter, forced, done_tag, progress)
        }
        Selection::TagGroup(tag) => {
            let filter = ListFilter {
                exclude_tag: (!forced).then_some(done_tag),
                require_tag: Some(tag),
            };
            listing_stream(store, filter, forced, done_tag, progress)
        }
    }
}

/// Walk state for a paginated listing.
struct Walk {
    store: Arc<dyn DocumentStore>,
    filter: ListFilter,
    page: usize,
    buf: VecDeque<DocumentRef>,
    exhausted: bool,
    announced: bool,
    seen: HashSet<DocumentId>,
    skip_done: bool,
    done_tag: TagId,
    progress: Arc<RunProgress>,
}

fn listing_stream(
    store: Arc<dyn DocumentStore>,
    filter: ListFilter,
    forced: bool,
    done_tag: TagId,
    progress: Arc<RunProgress>,
) -> DocumentStream {
    let walk = Walk {
        store,
        filter,
        page: 1,
        buf: VecDeque::new(),
        exhausted: false,
        announced: false,
        seen: HashSet::new(),
        skip_done: !forced,
        done_tag,
        progress,
    };

    Box::pin(stream::try_unfold(walk, |mut w| async move {
        loop {
            while let Some(doc) = w.buf.pop_front() {
                if !w.seen.insert(doc.id) {
                    // Shifted pagination window re-delivered a document we
                    // already yielded this run.
                    debug!("duplicate listing entry for document {}", doc.id);
                    continue;
                }
                if w.skip_done && doc.tags.contains(&w.done_tag) {
                    // Remote filter should have excluded it, but windows
                    // shift under concurrent tagging.
                    w.progress.document_skipped(doc.id);
                    continue;
                }
                return Ok(Some((doc, w)));
            }

            if w.exhausted {
                return Ok(None);
            }

            let page = w
                .store
                .list_documents(&w.filter, w.page)
                .await
                .map_err(enumeration)?;
            if !w.announced {
                w.announced = true;
                w.progress.run_started(page.total);
            }
            debug!("listing page {} delivered {} documents", w.page, page.documents.len());
            w.page += 1;
            w.exhausted = !page.has_more;
            w.buf.extend(page.documents);
        }
    }))
}

fn single_stream(
    store: Arc<dyn DocumentStore>,
    id: DocumentId,
    forced: bool,
    done_tag: TagId,
    progress: Arc<RunProgress>,
) -> DocumentStream {
    Box::pin(
        stream::once(async move {
            progress.run_started(Some(1));
            let doc = store.get_document(id).await.map_err(enumeration)?;
            if !forced && doc.tags.contains(&done_tag) {
                progress.document_skipped(doc.id);
                return Ok(None);
            }
            Ok(Some(doc))
        })
        .filter_map(|r: Result<Option<DocumentRef>, ReocrError>| future::ready(r.transpose())),
    )
}

fn retry_stream(
    store: Arc<dyn DocumentStore>,
    ids: Vec<DocumentId>,
    progress: Arc<RunProgress>,
) -> DocumentStream {
    let mut seen = HashSet::new();
    let ids: Vec<DocumentId> = ids.into_iter().filter(|id| seen.insert(*id)).collect();
    progress.run_started(Some(ids.len()));

    Box::pin(
        stream::iter(ids)
            .then(move |id| {
                let store = Arc::clone(&store);
                let progress = Arc::clone(&progress);
                async move {
                    match store.get_document(id).await {
                        Ok(doc) => Ok(Some(doc)),
                        Err(e) if e.is_not_found() => {
                            // The document was deleted since it failed;
                            // dropping it from the retry set is correct.
                            warn!("retry candidate {} no longer exists", id);
                            progress.document_skipped(id);
                            Ok(None)
                        }
                        Err(e) => Err(enumeration(e)),
                    }
                }
            })
            .filter_map(|r: Result<Option<DocumentRef>, ReocrError>| future::ready(r.transpose())),
    )
}
