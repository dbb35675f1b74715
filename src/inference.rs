//! Vision-model interaction: submit one page image, receive its transcript.
//!
//! This module is intentionally thin — all prompt text lives in
//! [`crate::prompts`] so it can be changed without touching transport code,
//! and retry policy lives in the pipeline stage so a test double sees every
//! attempt.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use tokio::time::Duration;
use tracing::debug;

use crate::error::InferenceError;

/// Transcribes a single page image. One call, no internal retry.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Submit one PNG page image and return the transcribed text.
    async fn transcribe(&self, page_png: &[u8]) -> Result<String, InferenceError>;
}

/// Wire shape of an Ollama `/api/generate` response.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Client for a local Ollama generate endpoint.
///
/// The request carries the page as a base64 PNG in `images` and disables
/// streaming — one response per page keeps the pipeline's
/// one-in-flight-page-per-document model simple.
pub struct OllamaClient {
    http: reqwest::Client,
    url: String,
    model: String,
    prompt: String,
}

impl OllamaClient {
    /// Build a client for `url` (e.g. `http://localhost:11434/api/generate`).
    ///
    /// `timeout_secs` bounds each call; vision models routinely take tens of
    /// seconds per page, so this is much larger than a typical HTTP timeout.
    pub fn new(
        url: &str,
        model: &str,
        prompt: &str,
        timeout_secs: u64,
    ) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            url: url.to_string(),
            model: model.to_string(),
            prompt: prompt.to_string(),
        })
    }
}

#[async_trait]
impl TranscriptionEngine for OllamaClient {
    async fn transcribe(&self, page_png: &[u8]) -> Result<String, InferenceError> {
        let image = STANDARD.encode(page_png);
        debug!("submitting page image ({} bytes base64)", image.len());

        let body = serde_json::json!({
            "model": self.model,
            "prompt": self.prompt,
            "images": [image],
            "stream": false,
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let detail: String = body.chars().take(200).collect();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let body: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))?;

        Ok(body.response.trim().to_string())
    }
}
