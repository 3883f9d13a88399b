//! Session-bus implementation of the peer link
//!
//! Wire contract with the peer process:
//! - well-known name `io.clipmirror.Peer1`
//! - object path `/io/clipmirror/Peer`
//! - interface `io.clipmirror.Peer1` with method `Transfer(s mimetype,
//!   s data)`, signal `Payload(s mimetype, s data)` and readable string
//!   properties `State` and `ErrorDetail`
//!
//! Payload data travels as base64 text in both directions, never raw bytes.
//! Peer presence is tracked through `org.freedesktop.DBus.NameOwnerChanged`
//! with an initial `NameHasOwner` probe.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zbus::names::WellKnownName;
use zbus::{proxy, Connection};

use super::bus::{BusGuard, BusSignal, PeerBus, PeerHandle};
use super::SyncError;

/// Well-known name the peer service claims on the session bus.
pub const PEER_SERVICE: &str = "io.clipmirror.Peer1";
/// Object path the peer exports.
pub const PEER_PATH: &str = "/io/clipmirror/Peer";
/// Interface the peer implements.
pub const PEER_INTERFACE: &str = "io.clipmirror.Peer1";

#[proxy(
    interface = "io.clipmirror.Peer1",
    default_service = "io.clipmirror.Peer1",
    default_path = "/io/clipmirror/Peer"
)]
trait Peer {
    /// Push one payload to the peer; fire-and-forget.
    fn transfer(&self, mimetype: &str, data: &str) -> zbus::Result<()>;

    /// Inbound payload from the peer.
    #[zbus(signal)]
    fn payload(&self, mimetype: String, data: String) -> zbus::Result<()>;

    /// Short status enum advertised by the peer.
    #[zbus(property)]
    fn state(&self) -> zbus::Result<String>;

    /// Free-text detail for the peer's error state.
    #[zbus(property)]
    fn error_detail(&self) -> zbus::Result<String>;
}

/// The D-Bus session bus as seen by the sync client.
pub struct SessionBus {
    conn: Connection,
}

impl SessionBus {
    /// Connect to the user's session bus.
    pub async fn connect() -> Result<Self, SyncError> {
        let conn = Connection::session().await?;
        debug!("connected to session bus as {:?}", conn.unique_name());
        Ok(Self { conn })
    }
}

#[async_trait]
impl PeerBus for SessionBus {
    async fn watch_peer(
        &self,
        signals: mpsc::UnboundedSender<BusSignal>,
    ) -> Result<BusGuard, SyncError> {
        let dbus = zbus::fdo::DBusProxy::new(&self.conn).await?;

        let name = WellKnownName::from_static_str_unchecked(PEER_SERVICE);
        if dbus.name_has_owner(name.into()).await? {
            let _ = signals.send(BusSignal::PeerAppeared);
        }

        let mut changes = dbus
            .receive_name_owner_changed_with_args(&[(0, PEER_SERVICE)])
            .await?;
        let forward = tokio::spawn(async move {
            while let Some(change) = changes.next().await {
                let Ok(args) = change.args() else { continue };
                let signal = if args.new_owner().is_some() {
                    BusSignal::PeerAppeared
                } else {
                    BusSignal::PeerVanished
                };
                if signals.send(signal).is_err() {
                    break;
                }
            }
        });

        Ok(BusGuard::new(vec![forward]))
    }

    async fn attach_peer(
        &self,
        signals: mpsc::UnboundedSender<BusSignal>,
    ) -> Result<Box<dyn PeerHandle>, SyncError> {
        let peer: PeerProxy<'static> = PeerProxy::new(&self.conn).await?;
        let mut tasks = Vec::with_capacity(3);

        {
            let peer = peer.clone();
            let signals = signals.clone();
            tasks.push(tokio::spawn(async move {
                let mut payloads = match peer.receive_payload().await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("failed to subscribe to peer payloads: {e}");
                        return;
                    }
                };
                while let Some(signal) = payloads.next().await {
                    let Ok(args) = signal.args() else { continue };
                    let forwarded = BusSignal::Payload {
                        mimetype: args.mimetype().clone(),
                        data: args.data().clone(),
                    };
                    if signals.send(forwarded).is_err() {
                        break;
                    }
                }
            }));
        }

        {
            let peer = peer.clone();
            let signals = signals.clone();
            tasks.push(tokio::spawn(async move {
                let mut states = peer.receive_state_changed().await;
                while let Some(change) = states.next().await {
                    match change.get().await {
                        Ok(value) => {
                            if signals.send(BusSignal::StateChanged(value)).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("unreadable peer state change: {e}"),
                    }
                }
            }));
        }

        {
            let peer = peer.clone();
            tasks.push(tokio::spawn(async move {
                let mut details = peer.receive_error_detail_changed().await;
                while let Some(change) = details.next().await {
                    match change.get().await {
                        Ok(value) => {
                            if signals.send(BusSignal::ErrorDetail(value)).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("unreadable peer error detail: {e}"),
                    }
                }
            }));
        }

        Ok(Box::new(SessionPeer {
            peer,
            _subscriptions: BusGuard::new(tasks),
        }))
    }
}

/// Live proxy plus its signal subscriptions; both released on drop.
struct SessionPeer {
    peer: PeerProxy<'static>,
    _subscriptions: BusGuard,
}

#[async_trait]
impl PeerHandle for SessionPeer {
    async fn transfer(&self, mimetype: &str, data: &str) -> Result<(), SyncError> {
        self.peer.transfer(mimetype, data).await?;
        Ok(())
    }

    async fn state(&self) -> Result<String, SyncError> {
        Ok(self.peer.state().await?)
    }

    async fn error_detail(&self) -> Result<String, SyncError> {
        Ok(self.peer.error_detail().await?)
    }
}
