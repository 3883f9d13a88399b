//! Integration tests for the persisted clipboard history

use std::time::Duration;

use bytes::Bytes;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::time::sleep;

use clipmirror::entry::ContentEntry;
use clipmirror::history::{index, CacheLayout, HistoryStore};

async fn store_at(dir: &TempDir, max_entries: usize, cache_size_mb: u64) -> HistoryStore {
    HistoryStore::load(dir.path(), max_entries, cache_size_mb)
        .await
        .unwrap()
}

#[tokio::test]
async fn round_trip_preserves_order_and_content() {
    let dir = TempDir::new().unwrap();
    {
        let mut store = store_at(&dir, 10, 10).await;
        store.insert(ContentEntry::text("first")).await;
        store.insert(ContentEntry::text("second")).await;
        store.insert(ContentEntry::text("third")).await;
        store.flush_now().await;
    }

    let reloaded = store_at(&dir, 10, 10).await;
    assert_eq!(reloaded.len(), 3);
    let texts: Vec<String> = reloaded
        .entries()
        .iter()
        .map(|e| e.as_text().unwrap().into_owned())
        .collect();
    assert_eq!(texts, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn read_trims_oldest_beyond_capacity() {
    let dir = TempDir::new().unwrap();
    {
        let mut store = store_at(&dir, 10, 10).await;
        for i in 0..5 {
            store.insert(ContentEntry::text(format!("entry {i}"))).await;
        }
        store.flush_now().await;
    }

    let reloaded = store_at(&dir, 3, 10).await;
    assert_eq!(reloaded.len(), 3);
    assert_eq!(reloaded.entries()[0].as_text().unwrap(), "entry 2");
    assert_eq!(reloaded.entries()[2].as_text().unwrap(), "entry 4");
}

#[tokio::test]
async fn image_blob_round_trips_through_the_cache() {
    let dir = TempDir::new().unwrap();
    let image_bytes = Bytes::from_static(b"\x89PNG\r\n\x1a\nfake image payload");
    let original = ContentEntry::image(image_bytes.clone(), "png");
    let blob_path;

    {
        let mut store = store_at(&dir, 10, 10).await;
        blob_path = store.layout().blob_path(original.content_hash());
        store.insert(original.clone()).await;
        store.flush_now().await;
        // The blob write is fired off separately from the index write.
        sleep(Duration::from_millis(200)).await;
        assert!(blob_path.exists(), "blob file should exist after flush");
    }

    let reloaded = store_at(&dir, 10, 10).await;
    assert_eq!(reloaded.len(), 1);
    let entry = &reloaded.entries()[0];
    assert_eq!(entry.mimetype(), "image/png");
    // Blob-backed entries hydrate lazily but compare without reading bytes.
    assert_eq!(*entry, original);
    assert_eq!(entry.bytes().await.unwrap(), image_bytes);
}

#[tokio::test]
async fn blob_writes_are_idempotent() {
    let dir = TempDir::new().unwrap();
    let layout = CacheLayout::new(dir.path());
    layout.prepare().await.unwrap();

    let entry = ContentEntry::image(Bytes::from_static(b"same bytes"), "png");
    let path_a = layout.blob_path(entry.content_hash());
    let path_b = layout.blob_path(entry.content_hash());
    assert_eq!(path_a, path_b);

    index::write_blob(&path_a, b"same bytes").await.unwrap();
    index::write_blob(&path_a, b"same bytes").await.unwrap();
    assert_eq!(tokio::fs::read(&path_a).await.unwrap(), b"same bytes");

    let blobs: Vec<_> = std::fs::read_dir(layout.blob_dir())
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(blobs.len(), 1);
}

#[tokio::test]
async fn oversized_index_resets_the_whole_cache() {
    let dir = TempDir::new().unwrap();
    let layout = CacheLayout::new(dir.path());
    layout.prepare().await.unwrap();

    // 2 MB index against a 1 MB ceiling, plus a stray blob.
    tokio::fs::write(layout.index_path(), vec![b'x'; 2 * 1024 * 1024])
        .await
        .unwrap();
    let stray_blob = layout.blob_dir().join("00000000deadbeef");
    tokio::fs::write(&stray_blob, b"stale").await.unwrap();

    let store = store_at(&dir, 10, 1).await;
    assert!(store.is_empty());
    assert!(!layout.index_path().exists());
    assert!(!stray_blob.exists());
    // The blob directory itself is recreated, ready for use.
    assert!(layout.blob_dir().exists());
}

#[tokio::test]
async fn corrupt_index_yields_an_empty_history() {
    let dir = TempDir::new().unwrap();
    let layout = CacheLayout::new(dir.path());
    layout.prepare().await.unwrap();
    tokio::fs::write(layout.index_path(), b"this is not json")
        .await
        .unwrap();

    let store = store_at(&dir, 10, 10).await;
    assert!(store.is_empty());
}

#[tokio::test]
async fn missing_blob_drops_only_that_entry() {
    let dir = TempDir::new().unwrap();
    let layout = CacheLayout::new(dir.path());
    layout.prepare().await.unwrap();

    let ghost = layout.blob_path(0x1234);
    let records = format!(
        r#"[{{"mimetype":"text/plain","contents":"still here"}},
            {{"mimetype":"image/png","contents":"{}"}}]"#,
        ghost.display()
    );
    tokio::fs::write(layout.index_path(), records).await.unwrap();

    let store = store_at(&dir, 10, 10).await;
    assert_eq!(store.len(), 1);
    assert_eq!(store.entries()[0].as_text().unwrap(), "still here");
}

#[tokio::test]
async fn eviction_deletes_the_backing_blob() {
    let dir = TempDir::new().unwrap();
    let mut store = store_at(&dir, 1, 10).await;

    let image = ContentEntry::image(Bytes::from_static(b"short-lived image"), "png");
    let blob_path = store.layout().blob_path(image.content_hash());
    store.insert(image).await;
    store.flush_now().await;
    sleep(Duration::from_millis(200)).await;
    assert!(blob_path.exists());

    // Capacity is 1: the next insert evicts the image and its blob.
    store.insert(ContentEntry::text("replacement")).await;
    assert_eq!(store.len(), 1);
    assert!(!blob_path.exists());
}

#[tokio::test]
async fn clear_removes_blobs_and_persists_empty() {
    let dir = TempDir::new().unwrap();
    let mut store = store_at(&dir, 10, 10).await;

    let image = ContentEntry::image(Bytes::from_static(b"cleared image"), "png");
    let blob_path = store.layout().blob_path(image.content_hash());
    store.insert(image).await;
    store.insert(ContentEntry::text("cleared text")).await;
    store.flush_now().await;
    sleep(Duration::from_millis(200)).await;
    assert!(blob_path.exists());

    store.clear().await;
    store.flush_now().await;
    assert!(!blob_path.exists());

    let reloaded = store_at(&dir, 10, 10).await;
    assert!(reloaded.is_empty());
}

#[tokio::test]
async fn mutations_flush_without_an_explicit_call() {
    let dir = TempDir::new().unwrap();
    let mut store = store_at(&dir, 10, 10).await;
    store.insert(ContentEntry::text("debounced")).await;

    // Past the debounce delay the index appears on its own.
    sleep(Duration::from_millis(900)).await;
    let raw = tokio::fs::read_to_string(store.layout().index_path())
        .await
        .unwrap();
    assert!(raw.contains("debounced"));
}
