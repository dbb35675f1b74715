//! Progress reporting for a run.
//!
//! Inject an `Arc<dyn RunProgressCallback>` via
//! [`crate::config::RunConfigBuilder::progress_callback`] to receive events
//! as workers finish documents.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers
//! can forward events to a terminal progress bar, a log file, or a metrics
//! sink without the library knowing how the host application communicates.
//! The trait is `Send + Sync`; events for different documents arrive
//! concurrently from different workers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::store::DocumentId;

/// Final counts of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Candidate count reported by the store, when it reported one.
    pub total: Option<usize>,
    /// Documents committed as done.
    pub done: usize,
    /// Documents committed as failed.
    pub failed: usize,
    /// Documents skipped client-side (already done, duplicate window).
    pub skipped: usize,
}

impl RunSummary {
    /// Documents that reached a terminal outcome or were skipped.
    pub fn completed(&self) -> usize {
        self.done + self.failed + self.skipped
    }

    /// Completion percentage against the known total, if any.
    pub fn percent(&self) -> Option<f64> {
        self.total.filter(|t| *t > 0).map(|t| {
            (self.completed() as f64 / t as f64) * 100.0
        })
    }
}

/// Called by the worker pool as documents move through the pipeline.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must protect shared mutable state
/// with appropriate synchronisation.
pub trait RunProgressCallback: Send + Sync {
    /// Called once when enumeration starts. `total` is known for listings
    /// that report a count and for retry runs.
    fn on_run_start(&self, total: Option<usize>) {
        let _ = total;
    }

    /// Called when a worker picks up a document.
    fn on_document_start(&self, id: DocumentId, title: &str) {
        let _ = (id, title);
    }

    /// Called when a document is committed as done.
    fn on_document_done(&self, id: DocumentId, pages: usize) {
        let _ = (id, pages);
    }

    /// Called when a document is committed as failed.
    fn on_document_failed(&self, id: DocumentId, reason: &str) {
        let _ = (id, reason);
    }

    /// Called when a document is skipped without processing.
    fn on_document_skipped(&self, id: DocumentId) {
        let _ = id;
    }

    /// Called once after the selector is exhausted and all workers drained.
    fn on_run_complete(&self, summary: &RunSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RunConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;

/// Run-scoped counters, shared by all workers.
///
/// Counters are incremented atomically; the summary read at the end is
/// consistent because all workers have been joined by then.
pub struct RunProgress {
    total: AtomicUsize,
    total_known: AtomicBool,
    done: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    callback: ProgressCallback,
}

impl RunProgress {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            total: AtomicUsize::new(0),
            total_known: AtomicBool::new(false),
            done: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            callback,
        }
    }

    /// Record the candidate total once it is known (first listing page or
    /// retry-set size) and announce the run start.
    pub fn run_started(&self, total: Option<usize>) {
        if let Some(t) = total {
            self.total.store(t, Ordering::SeqCst);
            self.total_known.store(true, Ordering::SeqCst);
        }
        self.callback.on_run_start(total);
    }

    pub fn document_started(&self, id: DocumentId, title: &str) {
        self.callback.on_document_start(id, title);
    }

    pub fn document_done(&self, id: DocumentId, pages: usize) {
        self.done.fetch_add(1, Ordering::SeqCst);
        self.callback.on_document_done(id, pages);
    }

    pub fn document_failed(&self, id: DocumentId, reason: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.callback.on_document_failed(id, reason);
    }

    pub fn document_skipped(&self, id: DocumentId) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.callback.on_document_skipped(id);
    }

    pub fn snapshot(&self) -> RunSummary {
        RunSummary {
            total: self
                .total_known
                .load(Ordering::SeqCst)
                .then(|| self.total.load(Ordering::SeqCst)),
            done: self.done.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
        }
    }

    pub fn run_complete(&self) -> RunSummary {
        let summary = self.snapshot();
        self.callback.on_run_complete(&summary);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingCallback {
        events: Mutex<Vec<String>>,
    }

    impl RunProgressCallback for RecordingCallback {
        fn on_run_start(&self, total: Option<usize>) {
            self.events.lock().unwrap().push(format!("start {total:?}"));
        }
        fn on_document_done(&self, id: DocumentId, _pages: usize) {
            self.events.lock().unwrap().push(format!("done {id}"));
        }
        fn on_document_failed(&self, id: DocumentId, _reason: &str) {
            self.events.lock().unwrap().push(format!("failed {id}"));
        }
        fn on_run_complete(&self, summary: &RunSummary) {
            self.events
                .lock()
                .unwrap()
                .push(format!("complete {}/{}", summary.done, summary.failed));
        }
    }

    #[test]
    fn counters_accumulate() {
        let progress = RunProgress::new(Arc::new(NoopProgressCallback));
        progress.run_started(Some(10));
        progress.document_done(1, 3);
        progress.document_done(2, 1);
        progress.document_failed(3, "inference");
        progress.document_skipped(4);

        let s = progress.snapshot();
        assert_eq!(s.total, Some(10));
        assert_eq!(s.done, 2);
        assert_eq!(s.failed, 1);
        assert_eq!(s.skipped, 1);
        assert_eq!(s.completed(), 4);
        assert_eq!(s.percent(), Some(40.0));
    }

    #[test]
    fn unknown_total_has_no_percent() {
        let progress = RunProgress::new(Arc::new(NoopProgressCallback));
        progress.run_started(None);
        progress.document_done(1, 1);
        let s = progress.snapshot();
        assert_eq!(s.total, None);
        assert_eq!(s.percent(), None);
    }

    #[test]
    fn callback_receives_events_in_order() {
        let cb = Arc::new(RecordingCallback {
            events: Mutex::new(Vec::new()),
        });
        let progress = RunProgress::new(cb.clone() as ProgressCallback);

        progress.run_started(Some(2));
        progress.document_done(7, 1);
        progress.document_failed(9, "acquisition");
        progress.run_complete();

        let events = cb.events.lock().unwrap();
        assert_eq!(
            *events,
            vec!["start Some(2)", "done 7", "failed 9", "complete 1/1"]
        );
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(Some(5));
        cb.on_document_start(1, "a title");
        cb.on_document_done(1, 2);
        cb.on_document_failed(2, "some error");
        cb.on_document_skipped(3);
        cb.on_run_complete(&RunSummary {
            total: Some(5),
            done: 1,
            failed: 1,
            skipped: 1,
        });
    }
}
