//! Prompt text for vision-model page transcription.
//!
//! Centralising the prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the default transcription
//!    behaviour requires editing exactly one place.
//!
//! 2. **Operator override** — deployments tune prompts per model without
//!    recompiling. [`resolve_prompt`] prefers an explicit configuration
//!    value, then an operator-editable prompt file, then the built-in
//!    default.

use std::path::Path;

use tracing::debug;

/// Default transcription prompt, used when no override is configured.
pub const DEFAULT_TRANSCRIPTION_PROMPT: &str = r#"You are a precise transcription engine. Transcribe ALL text visible in this document page image.

Follow these rules:

1. Preserve the reading order a human would use.
2. Reproduce the text exactly — do not summarise, translate, or correct it.
3. Keep line breaks between paragraphs, list items, and table rows.
4. Transcribe numbers, dates, and reference codes character for character.
5. Ignore watermarks, stamps, and decorative borders with no text content.
6. Output ONLY the transcribed text, with no commentary and no markup fences."#;

/// Resolve the prompt for a run.
///
/// Precedence: explicit `configured` text, then the contents of
/// `prompt_file` when it exists and is readable, then the built-in default.
/// An unreadable file is treated as absent rather than fatal — the run is
/// unattended and a missing prompt file should not stop thousands of
/// documents.
pub fn resolve_prompt(configured: Option<&str>, prompt_file: &Path) -> String {
    if let Some(text) = configured {
        return text.to_string();
    }

    match std::fs::read_to_string(prompt_file) {
        Ok(text) if !text.trim().is_empty() => {
            debug!("loaded prompt from {}", prompt_file.display());
            text
        }
        _ => DEFAULT_TRANSCRIPTION_PROMPT.to_string(),
    }
}
