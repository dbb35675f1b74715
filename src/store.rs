//! Remote document store: trait seam plus the Paperless HTTP client.
//!
//! Everything the pipeline knows about the store goes through
//! [`DocumentStore`], so tests and embedders can substitute an in-memory
//! implementation the same way a pre-built provider can be injected into the
//! run configuration.
//!
//! ## Retry Strategy
//!
//! 5xx responses and transport errors (connect failure, timeout) are
//! transient and retried with exponential backoff inside the client, so
//! callers see at most one error per logical operation. 4xx responses mean
//! the request itself is wrong (bad token, unknown tag id) and fail fast —
//! retrying them only hammers the store.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::error::{ReocrError, StoreError};

/// Opaque identifier of a document in the remote store.
pub type DocumentId = u64;

/// Identifier of a workflow tag in the remote store.
pub type TagId = u64;

/// Documents fetched per listing request.
const PAGE_SIZE: usize = 100;

/// Immutable snapshot of one document, taken at enumeration time.
///
/// A snapshot is used for exactly one pipeline run; reprocessing later
/// starts from a fresh fetch.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentRef {
    pub id: DocumentId,
    #[serde(default)]
    pub title: String,
    /// Checksum of the document's current content. Drives cache identity:
    /// a changed checksum produces a new cache key.
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub tags: Vec<TagId>,
}

/// One page of a paginated document listing.
#[derive(Debug, Clone)]
pub struct DocumentPage {
    pub documents: Vec<DocumentRef>,
    /// Total matching documents, when the store reports it. Only trusted
    /// for progress display, never for termination.
    pub total: Option<usize>,
    /// Whether the store has further pages.
    pub has_more: bool,
}

/// Remote-side filter for document listings.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Only documents *not* carrying this tag.
    pub exclude_tag: Option<TagId>,
    /// Only documents carrying this tag.
    pub require_tag: Option<TagId>,
}

/// Operations the pipeline needs from the document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one page (1-indexed) of the filtered document listing.
    async fn list_documents(
        &self,
        filter: &ListFilter,
        page: usize,
    ) -> Result<DocumentPage, StoreError>;

    /// Fetch a single document snapshot by id.
    async fn get_document(&self, id: DocumentId) -> Result<DocumentRef, StoreError>;

    /// Download the document's original file bytes.
    async fn download_original(&self, id: DocumentId) -> Result<Vec<u8>, StoreError>;

    /// Replace the document's extracted-text field.
    async fn update_content(&self, id: DocumentId, text: &str) -> Result<(), StoreError>;

    /// Add a tag to the document. Idempotent.
    async fn add_tag(&self, id: DocumentId, tag: TagId) -> Result<(), StoreError>;

    /// Remove a tag from the document. Idempotent.
    async fn remove_tag(&self, id: DocumentId, tag: TagId) -> Result<(), StoreError>;
}

// ── Paperless implementation ─────────────────────────────────────────────

/// Wire shape of the Paperless `/api/documents/` listing.
#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<DocumentRef>,
}

/// Minimal PATCH target for tag updates.
#[derive(Debug, Deserialize)]
struct TagsOnly {
    #[serde(default)]
    tags: Vec<TagId>,
}

/// HTTP client for a Paperless document store.
///
/// All requests carry `Authorization: Token <token>` and share one
/// connection pool.
pub struct PaperlessClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl PaperlessClient {
    /// Build a client for `base_url` (with or without trailing slash).
    pub fn new(
        base_url: &str,
        token: &str,
        timeout_secs: u64,
        max_retries: u32,
        retry_backoff_ms: u64,
    ) -> Result<Self, ReocrError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ReocrError::Internal(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            max_retries,
            retry_backoff_ms,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Run `call` with bounded exponential backoff on transient failures.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let mut last: Option<StoreError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    what, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match call().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() => {
                    warn!("{}: attempt {} failed — {}", what, attempt + 1, e);
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last.unwrap_or_else(|| StoreError::Transport("no attempt made".into())))
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let resp = req
            .header("Authorization", format!("Token {}", self.token))
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        // Pull a little of the body for the operator; truncated to keep log
        // lines usable.
        let body = resp.text().await.unwrap_or_default();
        let detail: String = body.chars().take(200).collect();
        Err(StoreError::Status {
            status: status.as_u16(),
            detail,
        })
    }

    async fn fetch_tags(&self, id: DocumentId) -> Result<Vec<TagId>, StoreError> {
        let url = self.url(&format!("/api/documents/{id}/"));
        let resp = self.send(self.http.get(&url)).await?;
        let doc: TagsOnly = resp
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(doc.tags)
    }

    async fn patch_tags(&self, id: DocumentId, tags: &[TagId]) -> Result<(), StoreError> {
        let url = self.url(&format!("/api/documents/{id}/"));
        self.send(
            self.http
                .patch(&url)
                .json(&serde_json::json!({ "tags": tags })),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PaperlessClient {
    async fn list_documents(
        &self,
        filter: &ListFilter,
        page: usize,
    ) -> Result<DocumentPage, StoreError> {
        let mut url = self.url(&format!(
            "/api/documents/?page={page}&page_size={PAGE_SIZE}&ordering=id"
        ));
        if let Some(tag) = filter.exclude_tag {
            url.push_str(&format!("&tags__id__none={tag}"));
        }
        if let Some(tag) = filter.require_tag {
            url.push_str(&format!("&tags__id__all={tag}"));
        }
        let url = url.as_str();

        let body: ListResponse = self
            .with_retry("list documents", || async move {
                let resp = self.send(self.http.get(url)).await?;
                resp.json()
                    .await
                    .map_err(|e| StoreError::Decode(e.to_string()))
            })
            .await?;

        debug!(
            "listing page {}: {} documents, more={}",
            page,
            body.results.len(),
            body.next.is_some()
        );

        Ok(DocumentPage {
            documents: body.results,
            total: body.count.map(|c| c as usize),
            has_more: body.next.is_some(),
        })
    }

    async fn get_document(&self, id: DocumentId) -> Result<DocumentRef, StoreError> {
        let url = self.url(&format!("/api/documents/{id}/"));
        let url = url.as_str();
        self.with_retry("get document", || async move {
            let resp = self.send(self.http.get(url)).await?;
            resp.json()
                .await
                .map_err(|e| StoreError::Decode(e.to_string()))
        })
        .await
    }

    async fn download_original(&self, id: DocumentId) -> Result<Vec<u8>, StoreError> {
        let url = self.url(&format!("/api/documents/{id}/download/"));
        let url = url.as_str();
        self.with_retry("download original", || async move {
            let resp = self.send(self.http.get(url)).await?;
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?;
            Ok(bytes.to_vec())
        })
        .await
    }

    async fn update_content(&self, id: DocumentId, text: &str) -> Result<(), StoreError> {
        let url = self.url(&format!("/api/documents/{id}/"));
        let url = url.as_str();
        self.with_retry("update content", || async move {
            self.send(
                self.http
                    .patch(url)
                    .json(&serde_json::json!({ "content": text })),
            )
            .await?;
            Ok(())
        })
        .await
    }

    async fn add_tag(&self, id: DocumentId, tag: TagId) -> Result<(), StoreError> {
        self.with_retry("add tag", || async move {
            let mut tags = self.fetch_tags(id).await?;
            if tags.contains(&tag) {
                return Ok(());
            }
            tags.push(tag);
            self.patch_tags(id, &tags).await
        })
        .await
    }

    async fn remove_tag(&self, id: DocumentId, tag: TagId) -> Result<(), StoreError> {
        self.with_retry("remove tag", || async move {
            let tags = self.fetch_tags(id).await?;
            if !tags.contains(&tag) {
                return Ok(());
            }
            let tags: Vec<TagId> = tags.into_iter().filter(|t| *t != tag).collect();
            self.patch_tags(id, &tags).await
        })
        .await
    }
}
