//! Per-page transcription with bounded retry.
//!
//! This stage drives the [`TranscriptionEngine`] for exactly one page and
//! owns the retry policy, so the engine itself stays a single-shot call.
//!
//! ## Retry Strategy
//!
//! Transport errors and 5xx responses from a local model endpoint are
//! transient and frequent while the model is loading or another request
//! holds the GPU. Exponential backoff (`backoff_ms * 2^attempt`) avoids
//! hammering a recovering endpoint: with 500 ms base and 3 retries the wait
//! sequence is 500 ms → 1 s → 2 s.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::error::InferenceError;
use crate::inference::TranscriptionEngine;

/// Transcript of one page.
#[derive(Debug, Clone)]
pub struct PageTranscript {
    /// 1-indexed page number.
    pub page_num: usize,
    pub text: String,
    pub duration_ms: u64,
    pub retries: u32,
}

/// Transcribe a single page image, retrying transient failures.
///
/// Returns the last error once `max_retries` extra attempts are exhausted;
/// the caller fails the whole document rather than committing partial text.
pub async fn transcribe_page(
    engine: &Arc<dyn TranscriptionEngine>,
    page_num: usize,
    image_png: &[u8],
    max_retries: u32,
    backoff_ms: u64,
) -> Result<PageTranscript, InferenceError> {
    let start = Instant::now();
    let mut last_err: Option<InferenceError> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "page {}: retry {}/{} after {}ms",
                page_num, attempt, max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match engine.transcribe(image_png).await {
            Ok(text) => {
                let duration = start.elapsed();
                debug!(
                    "page {}: {} chars in {:?}",
                    page_num,
                    text.len(),
                    duration
                );
                return Ok(PageTranscript {
                    page_num,
                    text,
                    duration_ms: duration.as_millis() as u64,
                    retries: attempt,
                });
            }
            Err(e) => {
                warn!("page {}: attempt {} failed — {}", page_num, attempt + 1, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| InferenceError::Transport("no attempt made".into())))
}
