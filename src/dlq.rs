//! Dead-letter queue: durable record of failed document ids.
//!
//! A line-oriented file at a fixed path. Each line is
//! `id<TAB>timestamp<TAB>reason`; the id is the first field so the file
//! doubles as a plain id list for shell tooling. Appends are serialised
//! through one async lock so concurrent workers never interleave partial
//! lines.
//!
//! A retry run drains the queue eagerly: read all ids, truncate the file,
//! then process. Ids that fail again are freshly re-appended instead of
//! accumulating duplicates. A crash between the truncate and a re-append
//! loses those ids — an accepted at-most-once trade-off, since the same
//! documents still carry the `failed` tag in the store and remain
//! discoverable there.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::DocumentId;

/// Append-only queue of failed document ids.
pub struct DeadLetterQueue {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DeadLetterQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one failed document. Creates the file on first use.
    pub async fn append(&self, id: DocumentId, reason: &str) -> std::io::Result<()> {
        let _held = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let timestamp = chrono::Utc::now().to_rfc3339();
        // Keep the record on one line whatever the reason contains.
        let reason: String = reason
            .chars()
            .map(|c| if c == '\n' || c == '\r' || c == '\t' { ' ' } else { c })
            .collect();
        let line = format!("{id}\t{timestamp}\t{reason}\n");

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!("dead-letter appended for document {}", id);
        Ok(())
    }

    /// Read every recorded id and truncate the file.
    ///
    /// Returns ids in first-seen order, deduplicated. A missing file is an
    /// empty queue. Unparseable lines are skipped rather than aborting the
    /// retry run.
    pub async fn drain(&self) -> std::io::Result<Vec<DocumentId>> {
        let _held = self.write_lock.lock().await;

        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut ids = Vec::new();
        for line in content.lines() {
            let first = line.split(['\t', ' ']).next().unwrap_or("");
            if let Ok(id) = first.parse::<DocumentId>() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }

        tokio::fs::write(&self.path, b"").await?;
        debug!("dead-letter queue drained: {} ids", ids.len());
        Ok(ids)
    }
}
