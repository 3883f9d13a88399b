//! Coordinator: wires the history store to the sync client
//!
//! Owns one [`HistoryStore`] and one [`SyncClient`] and is the only writer
//! to either. All mutable state is touched from a single event loop, so
//! state transitions and history mutations apply in the order their
//! triggering events arrive.
//!
//! Loop prevention: when a peer entry is applied to the local clipboard,
//! its content hash is remembered for a short suppression window. A
//! clipboard change inside that window with a matching hash is the echo of
//! our own write and is not forwarded back, which breaks the ping-pong two
//! synced clipboards would otherwise fall into.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clipboard::{Clipboard, ClipboardWatcher};
use crate::config::Config;
use crate::debounce::Debounce;
use crate::entry::ContentEntry;
use crate::history::HistoryStore;
use crate::sync::{BusSignal, PeerBus, SyncClient, SyncEvent};

/// How long an applied peer entry suppresses its own echo.
const SUPPRESS_WINDOW: Duration = Duration::from_secs(3);

/// Polling cadence of the clipboard watcher.
const CLIPBOARD_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Safety timeout for one clipboard read, so an unresponsive clipboard
/// owner cannot stall the refresh guard forever.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Receiving ends of the coordinator's event streams. Kept separate from
/// the coordinator itself so the run loop can poll them while handlers
/// borrow the coordinator mutably.
pub struct Channels {
    pub bus: mpsc::UnboundedReceiver<BusSignal>,
    pub sync: mpsc::UnboundedReceiver<SyncEvent>,
    pub refresh: mpsc::Receiver<Option<ContentEntry>>,
}

pub struct Coordinator {
    config: Config,
    store: HistoryStore,
    sync: SyncClient,
    clipboard: Arc<dyn Clipboard>,
    /// Content hash of the last applied peer entry, if still suppressed.
    /// A single remembered value, not a queue.
    suppressed: Arc<Mutex<Option<u64>>>,
    suppress_clear: Debounce,
    refresh_tx: mpsc::Sender<Option<ContentEntry>>,
    refresh_inflight: bool,
}

impl Coordinator {
    /// Build the coordinator: loads the persisted history and wires the
    /// sync client onto `bus`. Returns the coordinator plus the channels
    /// the run loop consumes.
    pub async fn new(
        config: Config,
        bus: Arc<dyn PeerBus>,
        clipboard: Arc<dyn Clipboard>,
    ) -> Result<(Self, Channels), crate::Error> {
        let store = HistoryStore::load(
            config.cache_root(),
            config.history.max_entries,
            config.history.cache_size_mb,
        )
        .await?;

        let (signal_tx, bus_rx) = mpsc::unbounded_channel();
        let (event_tx, sync_rx) = mpsc::unbounded_channel();
        let (refresh_tx, refresh_rx) = mpsc::channel(1);

        let sync = SyncClient::new(bus, signal_tx, event_tx, config.sync.enabled);

        let coordinator = Self {
            config,
            store,
            sync,
            clipboard,
            suppressed: Arc::new(Mutex::new(None)),
            suppress_clear: Debounce::new(SUPPRESS_WINDOW),
            refresh_tx,
            refresh_inflight: false,
        };
        let channels = Channels {
            bus: bus_rx,
            sync: sync_rx,
            refresh: refresh_rx,
        };
        Ok((coordinator, channels))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub fn sync(&self) -> &SyncClient {
        &self.sync
    }

    /// Start watching for the peer.
    pub async fn start(&mut self) {
        self.sync.start().await;
    }

    /// Run until interrupted, then shut down cleanly.
    pub async fn run(&mut self, channels: &mut Channels) -> Result<(), crate::Error> {
        self.start().await;
        let mut watcher =
            ClipboardWatcher::spawn(Arc::clone(&self.clipboard), CLIPBOARD_POLL_INTERVAL);
        info!("clipmirror running");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!("failed to listen for shutdown signal: {e}");
                    }
                    info!("shutdown requested");
                    break;
                }
                Some(()) = watcher.receiver.recv() => self.request_refresh(),
                Some(outcome) = channels.refresh.recv() => self.finish_refresh(outcome).await,
                Some(signal) = channels.bus.recv() => self.handle_bus_signal(signal).await,
                Some(event) = channels.sync.recv() => self.handle_sync_event(event).await,
            }
        }

        watcher.stop();
        self.shutdown().await;
        Ok(())
    }

    /// Feed one bus signal into the sync state machine.
    pub async fn handle_bus_signal(&mut self, signal: BusSignal) {
        self.sync.handle_signal(signal).await;
    }

    /// React to one sync client event.
    pub async fn handle_sync_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::State(state) => info!("sync state: {state}"),
            SyncEvent::Entry(entry) => self.apply_peer_entry(entry).await,
        }
    }

    /// Kick off a clipboard refresh unless one is already in flight; a
    /// request arriving while one is pending is dropped, not queued. The
    /// next clipboard-change notification re-triggers it naturally.
    pub fn request_refresh(&mut self) {
        if self.refresh_inflight {
            debug!("clipboard refresh already in flight, dropping request");
            return;
        }
        self.refresh_inflight = true;
        let clipboard = Arc::clone(&self.clipboard);
        let outcome_tx = self.refresh_tx.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(READ_TIMEOUT, clipboard.read_current()).await
            {
                Ok(Ok(entry)) => entry,
                Ok(Err(e)) => {
                    warn!("clipboard read failed: {e}");
                    None
                }
                Err(_) => {
                    warn!("clipboard read timed out");
                    None
                }
            };
            let _ = outcome_tx.send(outcome).await;
        });
    }

    /// Complete a refresh: releases the in-flight guard and processes the
    /// content, if any.
    pub async fn finish_refresh(&mut self, outcome: Option<ContentEntry>) {
        self.refresh_inflight = false;
        if let Some(entry) = outcome {
            self.on_local_change(entry).await;
        }
    }

    /// Apply a configuration snapshot after a change notification.
    pub async fn apply_config(&mut self, config: Config) {
        self.store.set_max_entries(config.history.max_entries).await;
        self.sync.set_enabled(config.sync.enabled).await;
        self.config = config;
    }

    /// Tear everything down and force a final history flush.
    pub async fn shutdown(&mut self) {
        self.sync.destroy();
        self.suppress_clear.cancel();
        self.store.flush_now().await;
        info!("coordinator stopped");
    }

    /// Handle a change of the local clipboard.
    async fn on_local_change(&mut self, entry: ContentEntry) {
        let hash = entry.content_hash();

        let suppressed = *lock(&self.suppressed);
        if suppressed == Some(hash) {
            debug!("suppressing echo of applied peer entry ({hash:016x})");
            return;
        }
        if suppressed.is_some() {
            // Genuinely new content closes the window early.
            self.suppress_clear.cancel();
            lock(&self.suppressed).take();
        }

        let mimetype = entry.mimetype().to_string();
        let payload = entry.inline_bytes().cloned();
        self.store.insert(entry).await;

        if let Some(bytes) = payload {
            self.sync.send(&mimetype, &bytes).await;
        }
    }

    /// Apply an inbound peer entry: remember its identity for the
    /// suppression window, mirror it onto the local clipboard, and record
    /// it in history. Never forwarded back.
    async fn apply_peer_entry(&mut self, entry: ContentEntry) {
        let hash = entry.content_hash();
        *lock(&self.suppressed) = Some(hash);
        let cell = Arc::clone(&self.suppressed);
        self.suppress_clear.schedule(async move {
            lock(&cell).take();
        });

        if let Err(e) = self.clipboard.write(&entry).await {
            warn!("failed to apply peer entry to clipboard: {e}");
        }
        self.store.insert(entry).await;
    }
}

fn lock(cell: &Mutex<Option<u64>>) -> MutexGuard<'_, Option<u64>> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}
