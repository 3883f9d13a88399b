//! Clipboard content as an immutable value type
//!
//! A [`ContentEntry`] pairs a mimetype tag with its raw bytes. Entries are
//! created at intake (from the system clipboard or from the peer) and never
//! mutated afterwards; the content hash is computed on first use and cached.

use std::borrow::Cow;
use std::hash::Hasher;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use once_cell::sync::OnceCell;
use twox_hash::XxHash64;

/// Fixed seed so content hashes are stable across runs and hosts.
const HASH_SEED: u64 = 0;

/// Compute the deterministic 64-bit content hash of a byte slice.
pub fn hash_bytes(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(HASH_SEED);
    hasher.write(data);
    hasher.finish()
}

/// One clipboard snapshot: a mimetype tag plus its payload.
#[derive(Debug, Clone)]
pub struct ContentEntry {
    mimetype: String,
    payload: Payload,
}

#[derive(Debug, Clone)]
enum Payload {
    /// Bytes captured directly from the clipboard or decoded from the peer.
    Inline {
        bytes: Bytes,
        hash: OnceCell<u64>,
    },
    /// Image bytes persisted as a content-addressed blob, read on demand.
    Blob {
        path: PathBuf,
        hash: u64,
        len: u64,
        bytes: OnceCell<Bytes>,
    },
}

impl ContentEntry {
    /// Create an entry from a mimetype tag and raw bytes.
    pub fn new(mimetype: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            mimetype: mimetype.into(),
            payload: Payload::Inline {
                bytes: bytes.into(),
                hash: OnceCell::new(),
            },
        }
    }

    /// Create a plain-text entry.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new("text/plain", Bytes::from(text.into()))
    }

    /// Create an image entry, e.g. `image("png")` yields `image/png`.
    pub fn image(bytes: impl Into<Bytes>, format: &str) -> Self {
        Self::new(format!("image/{format}"), bytes)
    }

    /// Reconstruct an image entry from its content-addressed blob file.
    ///
    /// The bytes stay on disk until [`ContentEntry::bytes`] is first called.
    pub fn from_blob(mimetype: impl Into<String>, path: PathBuf, hash: u64, len: u64) -> Self {
        Self {
            mimetype: mimetype.into(),
            payload: Payload::Blob {
                path,
                hash,
                len,
                bytes: OnceCell::new(),
            },
        }
    }

    pub fn mimetype(&self) -> &str {
        &self.mimetype
    }

    /// Text variant: `text/*` tags plus the bare X11 string atoms.
    pub fn is_text(&self) -> bool {
        self.mimetype.starts_with("text/")
            || self.mimetype == "STRING"
            || self.mimetype == "UTF8_STRING"
    }

    pub fn is_image(&self) -> bool {
        self.mimetype.starts_with("image/")
    }

    /// Deterministic hash of the raw bytes, computed once and cached.
    pub fn content_hash(&self) -> u64 {
        match &self.payload {
            Payload::Inline { bytes, hash } => *hash.get_or_init(|| hash_bytes(bytes)),
            Payload::Blob { hash, .. } => *hash,
        }
    }

    /// Length of the raw payload in bytes.
    pub fn byte_len(&self) -> u64 {
        match &self.payload {
            Payload::Inline { bytes, .. } => bytes.len() as u64,
            Payload::Blob { len, .. } => *len,
        }
    }

    /// Bytes already resident in memory, if any.
    ///
    /// Blob-backed entries return `None` until they have been hydrated.
    pub fn inline_bytes(&self) -> Option<&Bytes> {
        match &self.payload {
            Payload::Inline { bytes, .. } => Some(bytes),
            Payload::Blob { bytes, .. } => bytes.get(),
        }
    }

    /// Path of the backing blob file, for entries loaded from the cache.
    pub fn blob_ref(&self) -> Option<&Path> {
        match &self.payload {
            Payload::Inline { .. } => None,
            Payload::Blob { path, .. } => Some(path.as_path()),
        }
    }

    /// Full payload bytes, reading the backing blob on first access.
    pub async fn bytes(&self) -> io::Result<Bytes> {
        match &self.payload {
            Payload::Inline { bytes, .. } => Ok(bytes.clone()),
            Payload::Blob { path, bytes, .. } => {
                if let Some(cached) = bytes.get() {
                    return Ok(cached.clone());
                }
                let data = Bytes::from(tokio::fs::read(path).await?);
                Ok(bytes.get_or_init(|| data).clone())
            }
        }
    }

    /// Decoded text for non-image entries. Untyped tags decode like text.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        if self.is_image() {
            return None;
        }
        self.inline_bytes().map(|b| String::from_utf8_lossy(b))
    }

    /// Short human-readable rendering for history listings.
    pub fn preview(&self, max_chars: usize) -> String {
        if self.is_image() {
            return format!("[{}, {} bytes]", self.mimetype, self.byte_len());
        }
        match self.as_text() {
            Some(text) => {
                let trimmed = text.trim();
                if trimmed.chars().count() <= max_chars {
                    trimmed.to_string()
                } else {
                    let head: String = trimmed.chars().take(max_chars).collect();
                    format!("{head}…")
                }
            }
            None => format!("[{}]", self.mimetype),
        }
    }
}

/// Equality rule: text-like entries compare by decoded string value; image
/// entries compare by content hash AND byte length (hash alone is not enough).
/// A text entry never equals an image entry.
impl PartialEq for ContentEntry {
    fn eq(&self, other: &Self) -> bool {
        if self.is_image() != other.is_image() {
            return false;
        }
        if self.is_image() {
            self.content_hash() == other.content_hash() && self.byte_len() == other.byte_len()
        } else {
            match (self.as_text(), other.as_text()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
    }
}

impl Eq for ContentEntry {}
