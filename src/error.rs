//! Error types for the paperless-reocr library.
//!
//! Two distinct error levels reflect two distinct failure modes:
//!
//! * [`ReocrError`] — **Fatal**: the run cannot proceed at all (missing
//!   endpoint or token, document enumeration failed after retries).
//!   Returned as `Err(ReocrError)` from [`crate::run::run`].
//!
//! * [`DocumentFailure`] — **Non-fatal**: one document failed (download
//!   error, corrupt file, inference failure, commit failure) but the run
//!   continues. Converted by the committer into a `failed` tag and a
//!   dead-letter record rather than propagated upward.
//!
//! The separation keeps the propagation policy honest: per-document errors
//! never cross the pipeline boundary, and only configuration and enumeration
//! problems terminate the run.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::DocumentId;

/// All fatal errors returned by the paperless-reocr library.
///
/// Document-level failures use [`DocumentFailure`] and end up in the
/// dead-letter queue rather than here.
#[derive(Debug, Error)]
pub enum ReocrError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// Builder validation failed or a required setting is absent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Enumeration errors ────────────────────────────────────────────────
    /// The paginated document listing failed after all retries.
    ///
    /// Partial enumeration is never silently accepted — a document skipped
    /// here would be skipped forever by a run that reports "no more
    /// candidates".
    #[error("Document enumeration failed: {detail}")]
    Enumeration { detail: String },

    /// The dead-letter queue file could not be read at the start of a
    /// retry run.
    #[error("Failed to read dead-letter queue '{path}': {source}")]
    DlqRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which pipeline stage a document failed in.
///
/// Recorded in the dead-letter queue and reported by the dashboard so the
/// operator can tell a bad PDF from a flaky model endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Download or rasterisation failed.
    Acquisition,
    /// A page's inference call failed after all retries.
    Inference,
    /// The remote write-back failed after all retries.
    Commit,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Acquisition => write!(f, "acquisition"),
            FailureKind::Inference => write!(f, "inference"),
            FailureKind::Commit => write!(f, "commit"),
        }
    }
}

/// A non-fatal failure of a single document.
///
/// The pipeline stops at the first failing stage; no partial text is ever
/// committed for a failed document.
#[derive(Debug, Clone, Error)]
#[error("document {id}: {kind} failed: {detail}")]
pub struct DocumentFailure {
    pub id: DocumentId,
    pub kind: FailureKind,
    pub detail: String,
}

impl DocumentFailure {
    pub fn new(id: DocumentId, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            detail: detail.into(),
        }
    }
}

/// Errors from the remote document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store answered with a non-success HTTP status.
    #[error("store returned HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    /// The request never produced a response (connect error, timeout).
    #[error("store request failed: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("store response could not be decoded: {0}")]
    Decode(String),
}

impl StoreError {
    /// Transient failures are worth retrying with backoff; 4xx responses
    /// indicate a configuration problem and fail fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Transport(_) => true,
            StoreError::Status { status, .. } => *status >= 500,
            StoreError::Decode(_) => false,
        }
    }

    /// True when the store says the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Status { status: 404, .. })
    }
}

/// Errors from the inference endpoint.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference endpoint returned HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("inference request failed: {0}")]
    Transport(String),

    #[error("inference response could not be decoded: {0}")]
    Decode(String),
}

/// Errors from PDF rasterisation.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The downloaded bytes are not a document the rasteriser can open.
    #[error("document could not be opened: {0}")]
    Corrupt(String),

    /// One page failed to rasterise.
    #[error("page {page} failed to rasterise: {detail}")]
    Page { page: usize, detail: String },

    /// One page rasterised but could not be PNG-encoded.
    #[error("page {page} failed to encode: {detail}")]
    Encode { page: usize, detail: String },
}
