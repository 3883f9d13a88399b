//! Clipboard history management and persistence

pub mod index;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error};

use crate::debounce::Debounce;
use crate::entry::ContentEntry;

pub use index::CacheLayout;

/// Delay between a mutation and the index write; bursts coalesce into one.
const FLUSH_DELAY: Duration = Duration::from_millis(500);

/// History errors
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Cache directory could not be created
    #[error("Failed to prepare cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// IO error writing the index
    #[error("Failed to write history index: {0}")]
    Io(#[from] std::io::Error),

    /// Index serialization error
    #[error("Failed to encode history index: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Bounded, deduplicated, persisted clipboard history.
///
/// Entries are ordered oldest first, newest last. Inserting past the
/// capacity evicts the oldest entry; inserting content equal to an existing
/// entry collapses the two, promoting the content to newest. All mutations
/// schedule a debounced flush; [`HistoryStore::flush_now`] forces one on
/// shutdown. The store is the only writer of the persisted index.
pub struct HistoryStore {
    entries: Vec<ContentEntry>,
    max_entries: usize,
    layout: CacheLayout,
    flush: Debounce,
}

impl HistoryStore {
    /// Load the persisted history from `root`, creating the cache layout on
    /// first run. Corrupt or oversized on-disk state degrades to an empty
    /// store rather than an error.
    pub async fn load(
        root: impl Into<PathBuf>,
        max_entries: usize,
        cache_size_mb: u64,
    ) -> Result<Self, HistoryError> {
        let layout = CacheLayout::new(root);
        layout.prepare().await?;
        let entries = index::read(&layout, max_entries, cache_size_mb).await;
        debug!("loaded {} history entries", entries.len());
        Ok(Self {
            entries,
            max_entries,
            layout,
            flush: Debounce::new(FLUSH_DELAY),
        })
    }

    pub fn entries(&self) -> &[ContentEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Most recent entry, if any.
    pub fn newest(&self) -> Option<&ContentEntry> {
        self.entries.last()
    }

    /// True if content equal to `entry` is already in the history.
    pub fn contains(&self, entry: &ContentEntry) -> bool {
        self.entries.iter().any(|existing| existing == entry)
    }

    /// Insert an entry as the newest item.
    ///
    /// An equal existing entry is removed first (its blob, if any, is the
    /// same content-addressed file, so it stays). If the insert pushes the
    /// list past capacity the oldest entry is evicted in the same operation.
    pub async fn insert(&mut self, entry: ContentEntry) {
        if let Some(pos) = self.entries.iter().position(|existing| *existing == entry) {
            self.entries.remove(pos);
            debug!("collapsed duplicate history entry");
        }
        self.entries.push(entry);
        while self.entries.len() > self.max_entries {
            self.evict_front().await;
        }
        self.schedule_flush();
    }

    /// Drop the oldest entry.
    pub async fn evict_oldest(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        self.evict_front().await;
        self.schedule_flush();
    }

    /// Remove the entry at `position` (0 = oldest).
    pub async fn remove(&mut self, position: usize) {
        if position >= self.entries.len() {
            return;
        }
        let entry = self.entries.remove(position);
        self.discard_blob(&entry).await;
        self.schedule_flush();
    }

    /// Drop every entry and its blobs.
    pub async fn clear(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        for entry in &entries {
            self.discard_blob(entry).await;
        }
        self.schedule_flush();
    }

    /// Apply a new capacity, evicting from the oldest end if needed.
    pub async fn set_max_entries(&mut self, max_entries: usize) {
        self.max_entries = max_entries;
        let mut changed = false;
        while self.entries.len() > self.max_entries {
            self.evict_front().await;
            changed = true;
        }
        if changed {
            self.schedule_flush();
        }
    }

    /// Write the index immediately, cancelling any pending debounced flush.
    /// Called on shutdown so no mutation is lost.
    pub async fn flush_now(&self) {
        self.flush.cancel();
        if let Err(e) = index::write(&self.layout, &self.entries).await {
            error!("failed to persist history index: {e}");
        }
    }

    async fn evict_front(&mut self) {
        let entry = self.entries.remove(0);
        self.discard_blob(&entry).await;
    }

    /// Best-effort removal of an evicted entry's blob file. The index is
    /// the source of truth; an orphaned blob is a cosmetic leak, so failures
    /// are logged and ignored.
    async fn discard_blob(&self, entry: &ContentEntry) {
        if !entry.is_image() {
            return;
        }
        let path = match entry.blob_ref() {
            Some(existing) => existing.to_path_buf(),
            None => self.layout.blob_path(entry.content_hash()),
        };
        index::delete_blob(&path).await;
    }

    fn schedule_flush(&self) {
        let layout = self.layout.clone();
        let snapshot = self.entries.clone();
        self.flush.schedule(async move {
            if let Err(e) = index::write(&layout, &snapshot).await {
                error!("failed to persist history index: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;
    use tempfile::TempDir;

    async fn store(max_entries: usize) -> (HistoryStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::load(dir.path(), max_entries, 10).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn insert_appends_newest_last() {
        let (mut store, _dir) = store(10).await;
        store.insert(ContentEntry::text("first")).await;
        store.insert(ContentEntry::text("second")).await;
        assert_eq!(store.len(), 2);
        assert_eq!(store.newest().unwrap().as_text().unwrap(), "second");
    }

    #[tokio::test]
    async fn duplicate_insert_collapses_and_promotes() {
        let (mut store, _dir) = store(10).await;
        store.insert(ContentEntry::text("a")).await;
        store.insert(ContentEntry::text("b")).await;
        store.insert(ContentEntry::text("a")).await;
        assert_eq!(store.len(), 2);
        assert_eq!(store.entries()[0].as_text().unwrap(), "b");
        assert_eq!(store.newest().unwrap().as_text().unwrap(), "a");
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let (mut store, _dir) = store(3).await;
        for i in 0..5 {
            store.insert(ContentEntry::text(format!("entry {i}"))).await;
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.entries()[0].as_text().unwrap(), "entry 2");
        assert_eq!(store.newest().unwrap().as_text().unwrap(), "entry 4");
    }

    #[tokio::test]
    async fn shrinking_capacity_trims_oldest() {
        let (mut store, _dir) = store(5).await;
        for i in 0..5 {
            store.insert(ContentEntry::text(format!("entry {i}"))).await;
        }
        store.set_max_entries(2).await;
        assert_eq!(store.len(), 2);
        assert_eq!(store.entries()[0].as_text().unwrap(), "entry 3");
    }

    #[tokio::test]
    async fn evict_oldest_drops_the_front_entry() {
        let (mut store, _dir) = store(10).await;
        store.insert(ContentEntry::text("old")).await;
        store.insert(ContentEntry::text("new")).await;
        store.evict_oldest().await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.entries()[0].as_text().unwrap(), "new");
        // Evicting an empty store is harmless.
        store.clear().await;
        store.evict_oldest().await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn remove_and_clear_empty_the_store() {
        let (mut store, _dir) = store(10).await;
        store.insert(ContentEntry::text("keep")).await;
        store.insert(ContentEntry::text("drop")).await;
        store.remove(1).await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.newest().unwrap().as_text().unwrap(), "keep");
        store.clear().await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn contains_uses_content_equality() {
        let (mut store, _dir) = store(10).await;
        store.insert(ContentEntry::text("hello")).await;
        assert!(store.contains(&ContentEntry::text("hello")));
        assert!(!store.contains(&ContentEntry::text("other")));
        assert!(!store.contains(&ContentEntry::image(Bytes::from_static(b"hello"), "png")));
    }

    proptest! {
        // Capacity invariant: however entries arrive, the store never holds
        // more than max_entries once an insert completes.
        #[test]
        fn length_never_exceeds_capacity(
            texts in proptest::collection::vec(".{0,16}", 1..40),
            max in 1usize..8,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let dir = TempDir::new().unwrap();
                let mut store = HistoryStore::load(dir.path(), max, 10).await.unwrap();
                for text in texts {
                    store.insert(ContentEntry::text(text)).await;
                    assert!(store.len() <= max);
                }
            });
        }
    }
}
