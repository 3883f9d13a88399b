//! Clipboard abstraction layer
//!
//! The core never talks to the system clipboard directly; it consumes the
//! [`Clipboard`] trait plus change notifications from a poll-based watcher.
//! The shipped provider wraps `arboard`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::entry::ContentEntry;

/// Clipboard errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// Platform-specific error
    #[error("Clipboard backend error: {0}")]
    Backend(String),

    /// Read exceeded the safety timeout
    #[error("Clipboard read timed out")]
    Timeout,
}

/// Clipboard provider trait
#[async_trait]
pub trait Clipboard: Send + Sync {
    /// Read the current clipboard content, `None` when empty.
    async fn read_current(&self) -> Result<Option<ContentEntry>, ClipboardError>;

    /// Replace the clipboard content.
    async fn write(&self, entry: &ContentEntry) -> Result<(), ClipboardError>;

    /// Clear the clipboard.
    async fn clear(&self) -> Result<(), ClipboardError>;
}

/// System clipboard provider backed by arboard.
///
/// Applies text content only; arboard exposes images as raw RGBA frames,
/// which have no stable interchange encoding here, so non-text writes are
/// skipped with a log line.
pub struct SystemClipboard;

impl SystemClipboard {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemClipboard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clipboard for SystemClipboard {
    async fn read_current(&self) -> Result<Option<ContentEntry>, ClipboardError> {
        tokio::task::spawn_blocking(|| {
            let mut clipboard =
                arboard::Clipboard::new().map_err(|e| ClipboardError::Backend(e.to_string()))?;
            match clipboard.get_text() {
                Ok(text) if text.is_empty() => Ok(None),
                Ok(text) => Ok(Some(ContentEntry::text(text))),
                Err(arboard::Error::ContentNotAvailable) => Ok(None),
                Err(e) => Err(ClipboardError::Backend(e.to_string())),
            }
        })
        .await
        .map_err(|e| ClipboardError::Backend(e.to_string()))?
    }

    async fn write(&self, entry: &ContentEntry) -> Result<(), ClipboardError> {
        let Some(text) = entry.as_text().map(|text| text.into_owned()) else {
            debug!("skipping non-text clipboard write ({})", entry.mimetype());
            return Ok(());
        };
        tokio::task::spawn_blocking(move || {
            let mut clipboard =
                arboard::Clipboard::new().map_err(|e| ClipboardError::Backend(e.to_string()))?;
            clipboard
                .set_text(text)
                .map_err(|e| ClipboardError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| ClipboardError::Backend(e.to_string()))?
    }

    async fn clear(&self) -> Result<(), ClipboardError> {
        tokio::task::spawn_blocking(|| {
            let mut clipboard =
                arboard::Clipboard::new().map_err(|e| ClipboardError::Backend(e.to_string()))?;
            clipboard
                .clear()
                .map_err(|e| ClipboardError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| ClipboardError::Backend(e.to_string()))?
    }
}

/// Poll-based change watcher.
///
/// Emits one notification whenever the clipboard's content hash differs
/// from the previous poll. The receiver only learns that something changed;
/// reading the content back is the consumer's job, behind its own guard.
pub struct ClipboardWatcher {
    pub receiver: mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

impl ClipboardWatcher {
    pub fn spawn(clipboard: Arc<dyn Clipboard>, poll_interval: Duration) -> Self {
        let (tx, receiver) = mpsc::channel(8);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last_hash: Option<u64> = None;
            loop {
                ticker.tick().await;
                match clipboard.read_current().await {
                    Ok(Some(entry)) => {
                        let hash = entry.content_hash();
                        if last_hash != Some(hash) {
                            last_hash = Some(hash);
                            if tx.send(()).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!("clipboard poll failed: {e}"),
                }
            }
        });
        Self { receiver, handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for ClipboardWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedClipboard {
        content: Mutex<Option<ContentEntry>>,
    }

    #[async_trait]
    impl Clipboard for ScriptedClipboard {
        async fn read_current(&self) -> Result<Option<ContentEntry>, ClipboardError> {
            Ok(self.content.lock().unwrap().clone())
        }

        async fn write(&self, entry: &ContentEntry) -> Result<(), ClipboardError> {
            *self.content.lock().unwrap() = Some(entry.clone());
            Ok(())
        }

        async fn clear(&self) -> Result<(), ClipboardError> {
            *self.content.lock().unwrap() = None;
            Ok(())
        }
    }

    #[tokio::test]
    async fn watcher_notifies_once_per_distinct_content() {
        let clipboard = Arc::new(ScriptedClipboard {
            content: Mutex::new(Some(ContentEntry::text("initial"))),
        });
        let mut watcher =
            ClipboardWatcher::spawn(Arc::clone(&clipboard) as Arc<dyn Clipboard>, Duration::from_millis(5));

        // First poll sees the initial content.
        watcher.receiver.recv().await.unwrap();

        // Unchanged content produces no further notification.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(watcher.receiver.try_recv().is_err());

        // A change produces exactly one more.
        clipboard.write(&ContentEntry::text("changed")).await.unwrap();
        watcher.receiver.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(watcher.receiver.try_recv().is_err());

        watcher.stop();
    }
}
