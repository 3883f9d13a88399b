//! Persisted history index and content-addressed blob files
//!
//! The durable form of the history is a JSON array, oldest entry first:
//!
//! ```json
//! [{ "mimetype": "text/plain", "contents": "hello" },
//!  { "mimetype": "image/png",  "contents": "/path/to/blobs/8f3c…" }]
//! ```
//!
//! Text entries inline their decoded string; image entries reference a blob
//! file named after the content hash of its own bytes. Reading fails soft:
//! a corrupt index yields an empty history, a missing blob drops only that
//! entry. An index larger than the configured ceiling means runaway growth
//! or corruption, and resets the whole cache.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::entry::ContentEntry;
use crate::history::HistoryError;

const INDEX_FILE: &str = "index.json";
const BLOB_DIR: &str = "blobs";

/// On-disk layout of the history cache.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.root.join(BLOB_DIR)
    }

    /// Blob file for a content hash. Pure: identical bytes always map to
    /// the same path, which is what deduplicates identical images on disk.
    pub fn blob_path(&self, hash: u64) -> PathBuf {
        self.blob_dir().join(format!("{hash:016x}"))
    }

    /// Create the cache directories if they do not exist yet.
    pub async fn prepare(&self) -> Result<(), HistoryError> {
        fs::create_dir_all(self.blob_dir())
            .await
            .map_err(|source| HistoryError::CacheDir {
                path: self.root.clone(),
                source,
            })
    }
}

/// One persisted history record.
#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    mimetype: String,
    contents: String,
}

/// Load the persisted history, newest entry last.
///
/// Applies the size ceiling before parsing, drops unreadable entries
/// individually, and trims from the front (oldest) down to `max_entries`.
/// Never returns an error: any failure degrades to a smaller or empty list.
pub async fn read(layout: &CacheLayout, max_entries: usize, cache_size_mb: u64) -> Vec<ContentEntry> {
    let index_path = layout.index_path();

    let index_len = match fs::metadata(&index_path).await {
        Ok(meta) => meta.len(),
        Err(_) => return Vec::new(),
    };
    if index_len > cache_size_mb * 1024 * 1024 {
        warn!(
            "history index is {index_len} bytes, over the {cache_size_mb} MB ceiling; resetting cache"
        );
        wipe(layout).await;
        return Vec::new();
    }

    let raw = match fs::read_to_string(&index_path).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("failed to read history index: {e}");
            return Vec::new();
        }
    };
    let records: Vec<IndexRecord> = match serde_json::from_str(&raw) {
        Ok(records) => records,
        Err(e) => {
            warn!("history index is not valid JSON, starting empty: {e}");
            return Vec::new();
        }
    };

    let mut entries = Vec::with_capacity(records.len());
    for record in records {
        match revive(record).await {
            Some(entry) => entries.push(entry),
            None => debug!("dropped one unreadable history entry"),
        }
    }

    if entries.len() > max_entries {
        let excess = entries.len() - max_entries;
        entries.drain(..excess);
    }
    entries
}

async fn revive(record: IndexRecord) -> Option<ContentEntry> {
    if !record.mimetype.starts_with("image/") {
        return Some(ContentEntry::new(record.mimetype, record.contents));
    }

    let path = PathBuf::from(&record.contents);
    let hash = parse_blob_hash(&path)?;
    let len = match fs::metadata(&path).await {
        Ok(meta) => meta.len(),
        Err(_) => {
            debug!("blob {} is gone, dropping its entry", path.display());
            return None;
        }
    };
    Some(ContentEntry::from_blob(record.mimetype, path, hash, len))
}

/// Recover the content hash encoded in a blob filename.
fn parse_blob_hash(path: &Path) -> Option<u64> {
    let stem = path.file_name()?.to_str()?;
    u64::from_str_radix(stem, 16).ok()
}

/// Persist the ordered entry list as the durable index.
///
/// The index itself is written all-or-nothing (temp file then rename), so a
/// failed write leaves the previous index untouched. Blob writes for image
/// entries are fired off separately; their failures are logged, not raised.
pub async fn write(layout: &CacheLayout, entries: &[ContentEntry]) -> Result<(), HistoryError> {
    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.is_image() {
            let path = match entry.blob_ref() {
                Some(existing) => existing.to_path_buf(),
                None => layout.blob_path(entry.content_hash()),
            };
            if let Some(bytes) = entry.inline_bytes() {
                spawn_blob_write(path.clone(), bytes.clone());
            }
            records.push(IndexRecord {
                mimetype: entry.mimetype().to_string(),
                contents: path.to_string_lossy().into_owned(),
            });
        } else {
            let contents = entry
                .as_text()
                .map(|text| text.into_owned())
                .unwrap_or_default();
            records.push(IndexRecord {
                mimetype: entry.mimetype().to_string(),
                contents,
            });
        }
    }

    let serialized = serde_json::to_string(&records)?;
    let index_path = layout.index_path();
    let tmp_path = index_path.with_extension("json.tmp");
    fs::write(&tmp_path, serialized.as_bytes()).await?;
    fs::rename(&tmp_path, &index_path).await?;
    debug!("persisted {} history entries", records.len());
    Ok(())
}

/// Write a blob unless a file with that content hash already exists.
fn spawn_blob_write(path: PathBuf, bytes: bytes::Bytes) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };
    runtime.spawn(async move {
        if let Err(e) = write_blob(&path, &bytes).await {
            warn!("failed to write blob {}: {e}", path.display());
        }
    });
}

pub async fn write_blob(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if fs::try_exists(path).await.unwrap_or(false) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await
}

/// Best-effort blob removal; a missing file is not an error.
pub async fn delete_blob(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("deleted blob {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to delete blob {}: {e}", path.display()),
    }
}

/// Discard the whole on-disk cache: index and every blob.
pub async fn wipe(layout: &CacheLayout) {
    if let Err(e) = fs::remove_file(layout.index_path()).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove history index: {e}");
        }
    }
    if let Err(e) = fs::remove_dir_all(layout.blob_dir()).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove blob directory: {e}");
        }
    }
    if let Err(e) = fs::create_dir_all(layout.blob_dir()).await {
        warn!("failed to recreate blob directory: {e}");
    }
}
