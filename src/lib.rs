//! # ClipMirror
//!
//! Bounded, persisted clipboard history with mirroring to a peer process
//! over the D-Bus session bus.
//!
//! The two core pieces are the [`history::HistoryStore`] (deduplicated,
//! capacity-bounded, flushed to a JSON index plus content-addressed blob
//! files) and the [`sync::SyncClient`] (connection-lifecycle state machine
//! for the named peer service). The [`coordinator::Coordinator`] owns both
//! and guarantees that content echoed back from the peer is never
//! re-forwarded.

pub mod clipboard;
pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod entry;
pub mod history;
pub mod sync;

pub use config::Config;
pub use entry::ContentEntry;

/// Result type alias for ClipMirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ClipMirror operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Clipboard operation error
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] clipboard::ClipboardError),

    /// Peer sync error
    #[error("Sync error: {0}")]
    Sync(#[from] sync::SyncError),

    /// History persistence error
    #[error("History error: {0}")]
    History(#[from] history::HistoryError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
