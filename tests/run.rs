//! End-to-end tests for the run loop.
//!
//! The store, renderer, and transcription engine are in-memory doubles
//! injected through the config seams, so the whole pipeline — selection,
//! caching, per-document processing, committing, dead-lettering — runs
//! exactly as in production, minus the network and pdfium.
//!
//! The doubles plumb identity through the data: the store serves
//! `pdf-<id>` as a document's file bytes, the renderer stamps them into
//! each page image, and the engine can be told to fail any document by
//! matching on that marker.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use paperless_reocr::error::{InferenceError, RenderError, StoreError};
use paperless_reocr::{
    run, CacheKey, DeadLetterQueue, DocumentId, DocumentPage, DocumentRef, DocumentStore,
    ListFilter, PageCache, PageRenderer, PageSet, RunConfig, SelectionMode, TagId,
    TranscriptionEngine,
};

const DONE: TagId = 100;
const FAILED: TagId = 101;

// ── Store double ─────────────────────────────────────────────────────────────

#[derive(Clone)]
struct StoredDoc {
    title: String,
    checksum: String,
    tags: Vec<TagId>,
    content: String,
}

#[derive(Default)]
struct StoreState {
    docs: BTreeMap<DocumentId, StoredDoc>,
    downloads: usize,
    /// Filtered listing snapshotted when page 1 is requested, so pagination
    /// stays consistent while workers mutate tags mid-run.
    listing: Vec<DocumentRef>,
}

struct MockStore {
    state: Mutex<StoreState>,
    page_size: usize,
    /// Ids whose content update always fails (commit-path testing).
    fail_update: Vec<DocumentId>,
}

impl MockStore {
    fn new(ids: &[DocumentId]) -> Arc<Self> {
        Self::with_fail_update(ids, &[])
    }

    fn with_fail_update(ids: &[DocumentId], fail_update: &[DocumentId]) -> Arc<Self> {
        let mut docs = BTreeMap::new();
        for &id in ids {
            docs.insert(
                id,
                StoredDoc {
                    title: format!("doc {id}"),
                    checksum: format!("sum-{id}"),
                    tags: Vec::new(),
                    content: String::new(),
                },
            );
        }
        Arc::new(Self {
            state: Mutex::new(StoreState {
                docs,
                ..StoreState::default()
            }),
            page_size: 10,
            fail_update: fail_update.to_vec(),
        })
    }

    fn tags_of(&self, id: DocumentId) -> Vec<TagId> {
        self.state.lock().unwrap().docs[&id].tags.clone()
    }

    fn set_tags(&self, id: DocumentId, tags: &[TagId]) {
        self.state.lock().unwrap().docs.get_mut(&id).unwrap().tags = tags.to_vec();
    }

    fn set_checksum(&self, id: DocumentId, checksum: &str) {
        self.state
            .lock()
            .unwrap()
            .docs
            .get_mut(&id)
            .unwrap()
            .checksum = checksum.to_string();
    }

    fn content_of(&self, id: DocumentId) -> String {
        self.state.lock().unwrap().docs[&id].content.clone()
    }

    fn downloads(&self) -> usize {
        self.state.lock().unwrap().downloads
    }

    fn snapshot(doc: (&DocumentId, &StoredDoc)) -> DocumentRef {
        DocumentRef {
            id: *doc.0,
            title: doc.1.title.clone(),
            checksum: doc.1.checksum.clone(),
            tags: doc.1.tags.clone(),
        }
    }
}

#[async_trait]
impl DocumentStore for MockStore {
    async fn list_documents(
        &self,
        filter: &ListFilter,
        page: usize,
    ) -> Result<DocumentPage, StoreError> {
        let mut state = self.state.lock().unwrap();
        if page == 1 {
            state.listing = state
                .docs
                .iter()
                .filter(|(_, d)| match filter.exclude_tag {
                    Some(tag) => !d.tags.contains(&tag),
                    None => true,
                })
                .filter(|(_, d)| match filter.require_tag {
                    Some(tag) => d.tags.contains(&tag),
                    None => true,
                })
                .map(MockStore::snapshot)
                .collect();
        }

        let start = (page - 1) * self.page_size;
        let documents: Vec<DocumentRef> = state
            .listing
            .iter()
            .skip(start)
            .take(self.page_size)
            .cloned()
            .collect();
        Ok(DocumentPage {
            total: Some(state.listing.len()),
            has_more: start + self.page_size < state.listing.len(),
            documents,
        })
    }

    async fn get_document(&self, id: DocumentId) -> Result<DocumentRef, StoreError> {
        let state = self.state.lock().unwrap();
        state
            .docs
            .get_key_value(&id)
            .map(MockStore::snapshot)
            .ok_or(StoreError::Status {
                status: 404,
                detail: "no such document".into(),
            })
    }

    async fn download_original(&self, id: DocumentId) -> Result<Vec<u8>, StoreError> {
        let mut state = self.state.lock().unwrap();
        if !state.docs.contains_key(&id) {
            return Err(StoreError::Status {
                status: 404,
                detail: "no such document".into(),
            });
        }
        state.downloads += 1;
        Ok(format!("pdf-{id}").into_bytes())
    }

    async fn update_content(&self, id: DocumentId, text: &str) -> Result<(), StoreError> {
        if self.fail_update.contains(&id) {
            return Err(StoreError::Status {
                status: 500,
                detail: "storage backend unavailable".into(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.docs.get_mut(&id).unwrap().content = text.to_string();
        Ok(())
    }

    async fn add_tag(&self, id: DocumentId, tag: TagId) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let doc = state.docs.get_mut(&id).unwrap();
        if !doc.tags.contains(&tag) {
            doc.tags.push(tag);
        }
        Ok(())
    }

    async fn remove_tag(&self, id: DocumentId, tag: TagId) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let doc = state.docs.get_mut(&id).unwrap();
        doc.tags.retain(|t| *t != tag);
        Ok(())
    }
}

// ── Renderer double ──────────────────────────────────────────────────────────

struct MockRenderer {
    pages_per_doc: usize,
    /// Mirrors the renderer-side page limit of the production renderer.
    limit: Option<usize>,
    renders: AtomicUsize,
}

impl MockRenderer {
    fn new(pages_per_doc: usize) -> Arc<Self> {
        Self::limited(pages_per_doc, None)
    }

    fn limited(pages_per_doc: usize, limit: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            pages_per_doc,
            limit,
            renders: AtomicUsize::new(0),
        })
    }

    fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageRenderer for MockRenderer {
    async fn rasterize(&self, bytes: Vec<u8>) -> Result<PageSet, RenderError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        let marker = String::from_utf8_lossy(&bytes).into_owned();
        let rendered = match self.limit {
            Some(limit) => self.pages_per_doc.min(limit),
            None => self.pages_per_doc,
        };
        Ok(PageSet {
            images: (0..rendered)
                .map(|i| format!("{marker}|page{i}").into_bytes())
                .collect(),
            total_pages: self.pages_per_doc,
        })
    }
}

// ── Engine double ────────────────────────────────────────────────────────────

struct MockEngine {
    /// Fail every page whose image carries this marker.
    fail_marker: Option<String>,
    calls: AtomicUsize,
    current: AtomicUsize,
    max_concurrent: AtomicUsize,
    delay_ms: u64,
}

impl MockEngine {
    fn build(fail_marker: Option<String>, delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            fail_marker,
            calls: AtomicUsize::new(0),
            current: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            delay_ms,
        })
    }

    fn new() -> Arc<Self> {
        Self::build(None, 0)
    }

    fn failing_for(id: DocumentId) -> Arc<Self> {
        Self::build(Some(format!("pdf-{id}|")), 0)
    }

    fn with_delay(delay_ms: u64) -> Arc<Self> {
        Self::build(None, delay_ms)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionEngine for MockEngine {
    async fn transcribe(&self, page_png: &[u8]) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }

        let page = String::from_utf8_lossy(page_png).into_owned();
        let result = match &self.fail_marker {
            Some(marker) if page.contains(marker.as_str()) => {
                Err(InferenceError::Transport("model crashed".into()))
            }
            _ => Ok(format!("text of {page}")),
        };

        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ── Config helper ────────────────────────────────────────────────────────────

struct Harness {
    store: Arc<MockStore>,
    renderer: Arc<MockRenderer>,
    engine: Arc<MockEngine>,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new(store: Arc<MockStore>, engine: Arc<MockEngine>) -> Self {
        Self {
            store,
            renderer: MockRenderer::new(2),
            engine,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn config(&self) -> paperless_reocr::RunConfigBuilder {
        RunConfig::builder()
            .done_tag(DONE)
            .failed_tag(FAILED)
            .workers(2)
            .max_retries(0)
            .retry_backoff_ms(1)
            .cache_dir(self.dir.path().join("cache"))
            .dlq_path(self.dir.path().join("failed.tsv"))
            .store(self.store.clone())
            .engine(self.engine.clone())
            .renderer(self.renderer.clone())
    }

    fn dlq(&self) -> DeadLetterQueue {
        DeadLetterQueue::new(self.dir.path().join("failed.tsv"))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn default_run_processes_everything_once() {
    let h = Harness::new(MockStore::new(&[1, 2, 3]), MockEngine::new());

    let summary = run(h.config().build().unwrap()).await.unwrap();
    assert_eq!(summary.done, 3);
    assert_eq!(summary.failed, 0);

    for id in [1, 2, 3] {
        assert_eq!(h.store.tags_of(id), vec![DONE]);
        let content = h.store.content_of(id);
        assert!(
            content.contains(&format!("text of pdf-{id}|page0")),
            "content missing page 0: {content}"
        );
        assert!(content.contains("page1"), "content missing page 1");
        assert!(content.ends_with('\n'));
    }
    // 2 pages per document.
    assert_eq!(h.engine.calls(), 6);
}

#[tokio::test]
async fn second_run_is_idempotent() {
    let h = Harness::new(MockStore::new(&[1, 2, 3]), MockEngine::new());

    let first = run(h.config().build().unwrap()).await.unwrap();
    assert_eq!(first.done, 3);
    let calls_after_first = h.engine.calls();

    let second = run(h.config().build().unwrap()).await.unwrap();
    assert_eq!(second.done, 0);
    assert_eq!(second.failed, 0);
    assert_eq!(second.total, Some(0));
    assert_eq!(h.engine.calls(), calls_after_first);
}

#[tokio::test]
async fn pagination_yields_every_document_exactly_once() {
    // 25 documents across 3 listing pages of 10.
    let ids: Vec<DocumentId> = (1..=25).collect();
    let h = Harness::new(MockStore::new(&ids), MockEngine::new());

    let summary = run(h.config().workers(4).build().unwrap()).await.unwrap();
    assert_eq!(summary.done, 25);
    assert_eq!(summary.total, Some(25));
    for id in ids {
        assert_eq!(h.store.tags_of(id), vec![DONE]);
    }
}

#[tokio::test]
async fn one_bad_document_does_not_poison_the_run() {
    let ids: Vec<DocumentId> = (1..=10).collect();
    let h = Harness::new(MockStore::new(&ids), MockEngine::failing_for(5));

    let summary = run(h.config().build().unwrap()).await.unwrap();
    assert_eq!(summary.done, 9);
    assert_eq!(summary.failed, 1);

    assert_eq!(h.store.tags_of(5), vec![FAILED]);
    for id in ids.iter().filter(|id| **id != 5) {
        assert_eq!(h.store.tags_of(*id), vec![DONE]);
    }

    // Exactly one dead-letter record, naming the inference stage.
    let raw = std::fs::read_to_string(h.dir.path().join("failed.tsv")).unwrap();
    assert_eq!(raw.lines().count(), 1);
    assert!(raw.starts_with("5\t"), "got: {raw}");
    assert!(raw.contains("inference"), "got: {raw}");
}

#[tokio::test]
async fn no_document_ever_carries_both_tags() {
    // Document 1 was done in an earlier run; a forced re-run fails it.
    let h = Harness::new(MockStore::new(&[1]), MockEngine::failing_for(1));
    h.store.set_tags(1, &[DONE]);

    let summary = run(h.config().force(true).build().unwrap()).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(h.store.tags_of(1), vec![FAILED]);
}

#[tokio::test]
async fn unchanged_checksum_downloads_and_renders_once() {
    let h = Harness::new(MockStore::new(&[1]), MockEngine::new());

    run(h.config().build().unwrap()).await.unwrap();
    assert_eq!(h.store.downloads(), 1);
    assert_eq!(h.renderer.renders(), 1);

    // Forced reprocessing of the unchanged document hits the cache.
    run(h.config().force(true).build().unwrap()).await.unwrap();
    assert_eq!(h.store.downloads(), 1);
    assert_eq!(h.renderer.renders(), 1);

    // A changed checksum derives a new key and renders fresh.
    h.store.set_checksum(1, "sum-1-v2");
    run(h.config().force(true).build().unwrap()).await.unwrap();
    assert_eq!(h.store.downloads(), 2);
    assert_eq!(h.renderer.renders(), 2);
}

#[tokio::test]
async fn stale_cache_entry_is_never_served_for_changed_content() {
    let h = Harness::new(MockStore::new(&[1]), MockEngine::new());

    run(h.config().build().unwrap()).await.unwrap();
    let first_content = h.store.content_of(1);
    assert!(first_content.contains("pdf-1|page0"));

    // The cached rendering for the old checksum must not leak into the new
    // one: the entry key changes with the checksum.
    h.store.set_checksum(1, "sum-1-v2");
    let cache = PageCache::new(h.dir.path().join("cache"), None);
    let key = CacheKey {
        id: 1,
        checksum: "sum-1-v2".into(),
    };
    let rendered: Result<PageSet, std::io::Error> = cache
        .get_or_render(&key, || async move {
            Ok(PageSet {
                images: vec![b"fresh".to_vec()],
                total_pages: 1,
            })
        })
        .await;
    assert_eq!(rendered.unwrap().images, vec![b"fresh".to_vec()]);
}

#[tokio::test]
async fn retry_run_drains_and_reprocesses_failed_ids() {
    let ids: Vec<DocumentId> = (1..=8).collect();
    let h = Harness::new(MockStore::new(&ids), MockEngine::new());
    h.store.set_tags(3, &[FAILED]);
    h.store.set_tags(7, &[FAILED]);
    h.dlq().append(3, "inference: model crashed").await.unwrap();
    h.dlq().append(7, "inference: model crashed").await.unwrap();

    let summary = run(h.config().mode(SelectionMode::RetryFailed).build().unwrap())
        .await
        .unwrap();
    assert_eq!(summary.done, 2);
    assert_eq!(summary.total, Some(2));

    // Retried documents end done-only; the queue is empty again.
    assert_eq!(h.store.tags_of(3), vec![DONE]);
    assert_eq!(h.store.tags_of(7), vec![DONE]);
    assert_eq!(h.dlq().drain().await.unwrap(), Vec::<DocumentId>::new());
    // The untouched documents were not selected.
    assert!(h.store.tags_of(1).is_empty());
}

#[tokio::test]
async fn repeated_failure_lands_back_in_the_emptied_queue() {
    let h = Harness::new(MockStore::new(&[3, 7]), MockEngine::failing_for(3));
    h.dlq().append(3, "first failure").await.unwrap();
    h.dlq().append(7, "first failure").await.unwrap();

    let summary = run(h.config().mode(SelectionMode::RetryFailed).build().unwrap())
        .await
        .unwrap();
    assert_eq!(summary.done, 1);
    assert_eq!(summary.failed, 1);

    // Only the repeat offender is queued, once.
    assert_eq!(h.dlq().drain().await.unwrap(), vec![3]);
    assert_eq!(h.store.tags_of(3), vec![FAILED]);
    assert_eq!(h.store.tags_of(7), vec![DONE]);
}

#[tokio::test]
async fn retry_selection_ignores_done_filter() {
    let h = Harness::new(MockStore::new(&[4]), MockEngine::new());
    // A document can be done *and* dead-lettered after a forced run failed
    // to commit; retry must still pick it up.
    h.store.set_tags(4, &[DONE]);
    h.dlq().append(4, "commit: storage backend unavailable").await.unwrap();

    let summary = run(h.config().mode(SelectionMode::RetryFailed).build().unwrap())
        .await
        .unwrap();
    assert_eq!(summary.done, 1);
    assert_eq!(h.store.tags_of(4), vec![DONE]);
}

#[tokio::test]
async fn single_selection_processes_one_document() {
    let h = Harness::new(MockStore::new(&[1, 2, 3]), MockEngine::new());

    let summary = run(h.config().mode(SelectionMode::Single(2)).build().unwrap())
        .await
        .unwrap();
    assert_eq!(summary.done, 1);
    assert_eq!(h.store.tags_of(2), vec![DONE]);
    assert!(h.store.tags_of(1).is_empty());
    assert!(h.store.tags_of(3).is_empty());
}

#[tokio::test]
async fn tag_group_selection_respects_done_filter() {
    const GROUP: TagId = 55;
    let h = Harness::new(MockStore::new(&[1, 2, 3, 4]), MockEngine::new());
    h.store.set_tags(1, &[GROUP]);
    h.store.set_tags(2, &[GROUP, DONE]);
    h.store.set_tags(3, &[GROUP]);

    let summary = run(h.config().mode(SelectionMode::TagGroup(GROUP)).build().unwrap())
        .await
        .unwrap();
    assert_eq!(summary.done, 2);
    assert_eq!(h.store.tags_of(1), vec![GROUP, DONE]);
    assert_eq!(h.store.tags_of(2), vec![GROUP, DONE]);
    assert!(h.store.tags_of(4).is_empty());
}

#[tokio::test]
async fn worker_pool_bounds_concurrent_transcription() {
    let ids: Vec<DocumentId> = (1..=20).collect();
    let h = Harness::new(MockStore::new(&ids), MockEngine::with_delay(20));

    let summary = run(h.config().workers(4).build().unwrap()).await.unwrap();
    assert_eq!(summary.done, 20);

    let max = h.engine.max_concurrent.load(Ordering::SeqCst);
    assert!(max <= 4, "saw {max} concurrent transcriptions with 4 workers");
    assert!(max >= 2, "pool never overlapped documents (max {max})");
}

#[tokio::test]
async fn commit_failure_dead_letters_the_document() {
    let h = Harness::new(
        MockStore::with_fail_update(&[1, 2], &[2]),
        MockEngine::new(),
    );

    let summary = run(h.config().build().unwrap()).await.unwrap();
    assert_eq!(summary.done, 1);
    assert_eq!(summary.failed, 1);

    assert_eq!(h.store.tags_of(1), vec![DONE]);
    assert_eq!(h.store.tags_of(2), vec![FAILED]);
    let raw = std::fs::read_to_string(h.dir.path().join("failed.tsv")).unwrap();
    assert!(raw.starts_with("2\t"), "got: {raw}");
    assert!(raw.contains("commit"), "got: {raw}");
}

#[tokio::test]
async fn page_limit_truncates_and_annotates() {
    let h = Harness::new(MockStore::new(&[1]), MockEngine::new());
    // The production renderer receives the limit at construction; the
    // double mirrors that.
    let renderer = MockRenderer::limited(2, Some(1));

    let summary = run(
        h.config()
            .page_limit(Some(1))
            .renderer(renderer)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(summary.done, 1);
    // Renderer produces 2 pages; the limit transcribes 1 and says so.
    assert_eq!(h.engine.calls(), 1);
    let content = h.store.content_of(1);
    assert!(content.contains("1 of 2 pages transcribed"), "got: {content}");
}

#[tokio::test]
async fn preset_stop_flag_dispatches_nothing() {
    let h = Harness::new(MockStore::new(&[1, 2, 3]), MockEngine::new());
    let stop = Arc::new(AtomicBool::new(true));

    let summary = run(h.config().stop_flag(stop).build().unwrap())
        .await
        .unwrap();
    assert_eq!(summary.done, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(h.engine.calls(), 0);
    assert!(h.store.tags_of(1).is_empty());
}
