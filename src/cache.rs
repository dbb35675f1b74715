//! Content-addressed page cache.
//!
//! Rendered page images are stored on disk under a key derived from the
//! document id and its content checksum. A changed checksum derives a new
//! key, so stale pages are never served for changed content and no explicit
//! invalidation step exists — the old entry is simply orphaned.
//!
//! ## Coalescing
//!
//! Concurrent workers can miss on the same key (a retry run re-selecting a
//! document another worker just started, or duplicate listing windows).
//! Each key owns an async gate: the first caller renders while later
//! callers wait on the gate and then find the entry on disk. One download,
//! one render, per key.
//!
//! ## Atomic publish
//!
//! Entries are written into a temp directory beside the final path and
//! renamed into place, so a crash mid-write leaves no half-entry that a
//! later run could mistake for a hit. Entries are immutable once published.
//!
//! Cache I/O never fails a document: a broken entry reads as a miss and a
//! failed publish is logged and skipped — the rendered pages are returned
//! either way.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::store::{DocumentId, DocumentRef};

/// Identity of one cached rendering: `(document id, content checksum)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub id: DocumentId,
    pub checksum: String,
}

impl CacheKey {
    pub fn for_document(doc: &DocumentRef) -> Self {
        Self {
            id: doc.id,
            checksum: doc.checksum.clone(),
        }
    }

    /// Directory name for this key. Checksums are hex digests in practice;
    /// anything else is sanitised so the key stays a single path component.
    fn dir_name(&self) -> String {
        if self.checksum.is_empty() {
            return self.id.to_string();
        }
        let checksum: String = self
            .checksum
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}-{}", self.id, checksum)
    }
}

/// The rendered pages of one document, possibly truncated by a page limit.
#[derive(Debug, Clone)]
pub struct PageSet {
    /// PNG bytes, in page order.
    pub images: Vec<Vec<u8>>,
    /// Page count of the full document, which may exceed `images.len()`
    /// when a page limit was applied at render time.
    pub total_pages: usize,
}

/// Sidecar recording what an entry contains.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    total_pages: usize,
    /// The page limit in force when the entry was rendered. A different
    /// limit on a later run reads as a miss rather than serving a
    /// differently-truncated rendering.
    page_limit: Option<usize>,
    /// When the entry was rendered. Informational, for operators poking
    /// at the cache directory.
    #[serde(default)]
    rendered_at: String,
}

/// On-disk page cache with per-key miss coalescing.
pub struct PageCache {
    root: PathBuf,
    page_limit: Option<usize>,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PageCache {
    pub fn new(root: impl Into<PathBuf>, page_limit: Option<usize>) -> Self {
        Self {
            root: root.into(),
            page_limit,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Return the pages for `key`, rendering via `render` on a miss.
    ///
    /// Identical keys never trigger more than one render: concurrent
    /// callers for the same missing key wait for the first and read its
    /// published entry.
    pub async fn get_or_render<E, F, Fut>(&self, key: &CacheKey, render: F) -> Result<PageSet, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PageSet, E>>,
    {
        if let Some(pages) = self.load(key).await {
            debug!("cache hit for {}", key.dir_name());
            return Ok(pages);
        }

        let gate = {
            let mut map = self.inflight.lock().await;
            map.entry(key.dir_name()).or_default().clone()
        };
        let _held = gate.lock().await;

        // A concurrent renderer may have published while we waited.
        if let Some(pages) = self.load(key).await {
            debug!("cache hit for {} after coalesced wait", key.dir_name());
            return Ok(pages);
        }

        let pages = render().await?;
        if let Err(e) = self.publish(key, &pages).await {
            warn!("failed to cache pages for {}: {}", key.dir_name(), e);
        }
        Ok(pages)
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.dir_name())
    }

    /// Read an entry. Any inconsistency (missing sidecar, unreadable page,
    /// limit mismatch) reads as a miss.
    async fn load(&self, key: &CacheKey) -> Option<PageSet> {
        let dir = self.entry_path(key);
        let meta_raw = tokio::fs::read(dir.join("meta.json")).await.ok()?;
        let meta: EntryMeta = serde_json::from_slice(&meta_raw).ok()?;
        if meta.page_limit != self.page_limit {
            return None;
        }

        let mut images = Vec::new();
        loop {
            let path = dir.join(page_file_name(images.len()));
            match tokio::fs::read(&path).await {
                Ok(bytes) => images.push(bytes),
                Err(_) => break,
            }
        }

        let expected = match meta.page_limit {
            Some(limit) => meta.total_pages.min(limit),
            None => meta.total_pages,
        };
        if images.len() != expected {
            return None;
        }

        Some(PageSet {
            images,
            total_pages: meta.total_pages,
        })
    }

    /// Write the entry to a temp directory and rename it into place.
    async fn publish(&self, key: &CacheKey, pages: &PageSet) -> std::io::Result<()> {
        let final_dir = self.entry_path(key);
        let tmp_dir = self.root.join(format!(".tmp-{}", key.dir_name()));

        // Leftover temp from a crashed run.
        let _ = tokio::fs::remove_dir_all(&tmp_dir).await;
        tokio::fs::create_dir_all(&tmp_dir).await?;

        for (i, image) in pages.images.iter().enumerate() {
            tokio::fs::write(tmp_dir.join(page_file_name(i)), image).await?;
        }
        let meta = EntryMeta {
            total_pages: pages.total_pages,
            page_limit: self.page_limit,
            rendered_at: chrono::Utc::now().to_rfc3339(),
        };
        let meta_bytes = serde_json::to_vec(&meta)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(tmp_dir.join("meta.json"), meta_bytes).await?;

        if tokio::fs::rename(&tmp_dir, &final_dir).await.is_ok() {
            return Ok(());
        }
        // The destination exists: either a concurrent publish of the same
        // key, or a leftover entry rendered under a different page limit.
        // We hold the key gate, so replacing it is safe.
        let _ = tokio::fs::remove_dir_all(&final_dir).await;
        match tokio::fs::rename(&tmp_dir, &final_dir).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&tmp_dir).await;
                if final_dir.is_dir() {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }
}

impl PageCache {
    /// Best-effort removal of orphaned entries for `current.id` whose
    /// checksum differs from `current`. Old renderings of a changed
    /// document are never read again (their key no longer derives), so
    /// this only reclaims disk.
    pub async fn sweep_orphans(&self, current: &CacheKey) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.root).await else {
            return;
        };
        let keep = current.dir_name();
        let prefix = format!("{}-", current.id);
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != keep && (name.starts_with(&prefix) || name == current.id.to_string()) {
                debug!("sweeping orphaned cache entry {}", name);
                let _ = tokio::fs::remove_dir_all(entry.path()).await;
            }
        }
    }
}

fn page_file_name(index: usize) -> String {
    // Zero-padded so lexicographic directory order is page order.
    format!("page_{index:04}.png")
}
