//! Peer sync client: connection lifecycle and payload forwarding
//!
//! [`SyncClient`] maintains a live proxy to the single named peer service on
//! the message bus. It is a state machine driven by [`BusSignal`]s delivered
//! in bus order: the peer's name appearing or vanishing, inbound payload
//! signals, and property changes. Every bus fault is caught here and turned
//! into a state transition or a logged no-op; nothing propagates to the
//! caller, since a crash in this path would take down the host process.

pub mod bus;
pub mod dbus;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::entry::ContentEntry;

pub use bus::{BusGuard, BusSignal, PeerBus, PeerHandle};
pub use dbus::SessionBus;

/// Ceiling on the base64-encoded size of one payload (roughly 10 MB raw).
/// D-Bus messages cap out near 16 MiB; anything bigger is dropped, not sent.
pub const MAX_ENCODED_PAYLOAD: usize = 14 * 1024 * 1024;

/// Deadline for one outbound transfer call.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Sync errors
#[derive(Debug, Error)]
pub enum SyncError {
    /// Underlying bus failure
    #[error("Bus error: {0}")]
    Bus(#[from] zbus::Error),

    /// Bus daemon call failure
    #[error("Bus daemon error: {0}")]
    BusDaemon(#[from] zbus::fdo::Error),

    /// Payload that could not be decoded
    #[error("Malformed peer payload: {0}")]
    Decode(#[from] base64::DecodeError),

    /// Outbound call exceeded its deadline
    #[error("Peer call timed out")]
    Timeout,
}

/// Connection state. Exactly one holds at a time.
///
/// `Connected` and `Listening` are the active-send states; everything else
/// suppresses outbound forwarding. A peer-reported status outside the known
/// set is carried verbatim as `Foreign` rather than coerced to a known one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Disabled,
    Connecting,
    Connected,
    Listening,
    Disconnected,
    Error,
    Stopped,
    Foreign(String),
}

impl SyncState {
    /// Map a peer-advertised `State` string onto a state. The peer is the
    /// authority on its own health; unknown values pass through untouched.
    pub fn from_peer(value: &str) -> Self {
        match value {
            "connecting" => Self::Connecting,
            "connected" => Self::Connected,
            "listening" => Self::Listening,
            "disconnected" => Self::Disconnected,
            "error" => Self::Error,
            "stopped" => Self::Stopped,
            other => Self::Foreign(other.to_string()),
        }
    }

    /// True in the states where outbound forwarding is permitted.
    pub fn is_active_send(&self) -> bool {
        matches!(self, Self::Connected | Self::Listening)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Listening => write!(f, "listening"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
            Self::Stopped => write!(f, "stopped"),
            Self::Foreign(other) => write!(f, "{other}"),
        }
    }
}

/// Events emitted toward the owner of the client.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The connection state changed.
    State(SyncState),
    /// A decoded inbound entry from the peer.
    Entry(ContentEntry),
}

/// Connection-lifecycle state machine for the peer link.
pub struct SyncClient {
    bus: Arc<dyn PeerBus>,
    signal_tx: mpsc::UnboundedSender<BusSignal>,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    state: SyncState,
    enabled: bool,
    destroyed: bool,
    watch: Option<BusGuard>,
    peer: Option<Box<dyn PeerHandle>>,
    error_detail: String,
}

impl SyncClient {
    /// Create a client. `signal_tx` is handed to the bus layer so that
    /// watches and subscriptions feed [`SyncClient::handle_signal`] in
    /// delivery order; `event_tx` carries state changes and inbound entries
    /// to the owner.
    pub fn new(
        bus: Arc<dyn PeerBus>,
        signal_tx: mpsc::UnboundedSender<BusSignal>,
        event_tx: mpsc::UnboundedSender<SyncEvent>,
        enabled: bool,
    ) -> Self {
        Self {
            bus,
            signal_tx,
            event_tx,
            state: SyncState::Disabled,
            enabled,
            destroyed: false,
            watch: None,
            peer: None,
            error_detail: String::new(),
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn error_detail(&self) -> &str {
        &self.error_detail
    }

    /// Begin watching for the peer if sync is enabled.
    pub async fn start(&mut self) {
        if self.destroyed || !self.enabled {
            return;
        }
        self.set_state(SyncState::Connecting);
        self.begin_watch().await;
    }

    /// Apply one bus signal. Transitions happen in the order signals are
    /// delivered; a destroyed client ignores everything.
    pub async fn handle_signal(&mut self, signal: BusSignal) {
        if self.destroyed {
            return;
        }
        match signal {
            BusSignal::PeerAppeared => self.on_peer_appeared().await,
            BusSignal::PeerVanished => self.on_peer_vanished(),
            BusSignal::Payload { mimetype, data } => self.on_payload(mimetype, data),
            BusSignal::StateChanged(value) => self.set_state(SyncState::from_peer(&value)),
            BusSignal::ErrorDetail(detail) => self.error_detail = detail,
        }
    }

    /// Forward one payload to the peer.
    ///
    /// Silently does nothing unless a live proxy exists, sync is enabled,
    /// the state permits sending, and both arguments are non-empty. An
    /// encoded payload over [`MAX_ENCODED_PAYLOAD`] is dropped by design.
    /// Failures are logged, never retried; the next clipboard change will
    /// resend naturally if still relevant.
    pub async fn send(&self, mimetype: &str, bytes: &[u8]) {
        if self.destroyed || !self.enabled || !self.state.is_active_send() {
            return;
        }
        let Some(peer) = &self.peer else { return };
        if mimetype.is_empty() || bytes.is_empty() {
            return;
        }

        let encoded = BASE64.encode(bytes);
        if encoded.len() > MAX_ENCODED_PAYLOAD {
            debug!(
                "dropping oversized outbound payload: {} bytes encoded",
                encoded.len()
            );
            return;
        }

        match tokio::time::timeout(SEND_TIMEOUT, peer.transfer(mimetype, &encoded)).await {
            Ok(Ok(())) => debug!("forwarded {mimetype} payload ({} bytes raw)", bytes.len()),
            Ok(Err(e)) => warn!("peer transfer failed: {e}"),
            Err(_) => warn!("peer transfer timed out after {SEND_TIMEOUT:?}"),
        }
    }

    /// Enable or disable sync. Disabling tears down the watch and proxy at
    /// once; enabling restarts the watch-for-peer sequence. A matching
    /// value is a no-op.
    pub async fn set_enabled(&mut self, enabled: bool) {
        if self.destroyed || enabled == self.enabled {
            return;
        }
        self.enabled = enabled;
        if enabled {
            info!("sync enabled");
            self.set_state(SyncState::Connecting);
            self.begin_watch().await;
        } else {
            info!("sync disabled");
            self.watch = None;
            self.peer = None;
            self.set_state(SyncState::Disabled);
        }
    }

    /// Permanently tear down the client: releases the name watch and every
    /// subscription, then latches inert. No operation after this point has
    /// any visible effect.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.watch = None;
        self.peer = None;
    }

    async fn begin_watch(&mut self) {
        match self.bus.watch_peer(self.signal_tx.clone()).await {
            Ok(guard) => {
                // The toggle may have flipped while registration was in
                // flight; releasing the guard undoes the watch.
                if self.destroyed || !self.enabled {
                    drop(guard);
                    return;
                }
                self.watch = Some(guard);
            }
            Err(e) => {
                warn!("failed to watch for peer name: {e}");
                self.set_state(SyncState::Disconnected);
            }
        }
    }

    async fn on_peer_appeared(&mut self) {
        if !self.enabled {
            return;
        }
        debug!("peer name appeared, attaching proxy");
        match self.bus.attach_peer(self.signal_tx.clone()).await {
            Ok(peer) => {
                if self.destroyed || !self.enabled {
                    return;
                }
                let state = match peer.state().await {
                    Ok(value) => SyncState::from_peer(&value),
                    Err(e) => {
                        debug!("peer state unreadable, assuming connecting: {e}");
                        SyncState::Connecting
                    }
                };
                if self.destroyed || !self.enabled {
                    return;
                }
                self.peer = Some(peer);
                self.set_state(state);
            }
            Err(e) => {
                warn!("failed to attach to peer: {e}");
                self.set_state(SyncState::Disconnected);
            }
        }
    }

    fn on_peer_vanished(&mut self) {
        self.peer = None;
        if self.enabled {
            self.set_state(SyncState::Disconnected);
        }
    }

    /// Decode one inbound payload. Oversized or malformed messages are
    /// discarded without touching connection state.
    fn on_payload(&mut self, mimetype: String, data: String) {
        if data.len() > MAX_ENCODED_PAYLOAD {
            warn!(
                "dropping oversized inbound payload: {} bytes encoded",
                data.len()
            );
            return;
        }
        let bytes = match BASE64.decode(data.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("discarding malformed inbound payload: {e}");
                return;
            }
        };
        debug!("received {mimetype} payload ({} bytes raw)", bytes.len());
        let entry = ContentEntry::new(mimetype, Bytes::from(bytes));
        let _ = self.event_tx.send(SyncEvent::Entry(entry));
    }

    fn set_state(&mut self, state: SyncState) {
        if state == self.state {
            return;
        }
        debug!("sync state: {} -> {}", self.state, state);
        self.state = state.clone();
        let _ = self.event_tx.send(SyncEvent::State(state));
    }
}
