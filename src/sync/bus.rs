//! Trait seam between the sync state machine and the message bus
//!
//! The state machine never talks to D-Bus directly; it consumes an ordered
//! stream of [`BusSignal`]s and calls back through [`PeerBus`] /
//! [`PeerHandle`]. Tests drive the machine with hand-rolled fakes.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::SyncError;

/// Events delivered by the bus layer, in bus delivery order.
#[derive(Debug, Clone)]
pub enum BusSignal {
    /// The peer's well-known name gained an owner.
    PeerAppeared,
    /// The peer's well-known name lost its owner.
    PeerVanished,
    /// Inbound payload signal; `data` is base64 text as on the wire.
    Payload { mimetype: String, data: String },
    /// The peer's `State` property changed.
    StateChanged(String),
    /// The peer's `ErrorDetail` property changed.
    ErrorDetail(String),
}

/// Access to the bus: name watching and proxy construction.
#[async_trait]
pub trait PeerBus: Send + Sync {
    /// Register a watch on the peer's well-known name. Presence changes are
    /// delivered through `signals`; the returned guard releases the watch.
    async fn watch_peer(
        &self,
        signals: mpsc::UnboundedSender<BusSignal>,
    ) -> Result<BusGuard, SyncError>;

    /// Build a proxy to the peer service and subscribe to its payload
    /// signal and property changes, forwarded through `signals`.
    async fn attach_peer(
        &self,
        signals: mpsc::UnboundedSender<BusSignal>,
    ) -> Result<Box<dyn PeerHandle>, SyncError>;
}

/// A live proxy to the peer. Dropping it releases every subscription.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// Invoke the peer's transfer method; `data` is base64 text.
    async fn transfer(&self, mimetype: &str, data: &str) -> Result<(), SyncError>;

    /// Read the peer's currently-advertised `State` property.
    async fn state(&self) -> Result<String, SyncError>;

    /// Read the peer's `ErrorDetail` property.
    async fn error_detail(&self) -> Result<String, SyncError>;
}

/// RAII handle for bus subscriptions: aborts its forwarding tasks on drop,
/// so a released watch can never deliver another signal.
#[derive(Debug, Default)]
pub struct BusGuard {
    tasks: Vec<JoinHandle<()>>,
}

impl BusGuard {
    pub fn new(tasks: Vec<JoinHandle<()>>) -> Self {
        Self { tasks }
    }

    /// Guard with nothing to release; used by in-process fakes.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn release(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for BusGuard {
    fn drop(&mut self) {
        self.release();
    }
}
