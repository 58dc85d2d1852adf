//! Application state shared across handlers and background tasks.
//!
//! One [`AppState`] is built in `main` and shared as `Arc<AppState>` by the
//! MQTT event loop, the ingestion worker, the feedback publisher and every
//! HTTP handler.
//!
//! Lock order when more than one is needed: `store`, then `cache`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use deepwatt_store::Store;
use serde::Serialize;
use tokio::sync::{Mutex, watch};

use crate::cache::RealtimeCache;
use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// The data store (wrapped in Mutex for thread-safe access).
    pub store: Mutex<Store>,
    /// Latest sample per device.
    pub cache: RealtimeCache,
    /// Configuration, fixed for the lifetime of the process.
    pub config: Config,
    /// Listener connection state and counters.
    pub listener: ListenerState,
}

impl AppState {
    /// Create new application state.
    pub fn new(store: Store, config: Config) -> Arc<Self> {
        let cache = RealtimeCache::new(config.realtime.ttl);
        Arc::new(Self {
            store: Mutex::new(store),
            cache,
            config,
            listener: ListenerState::new(),
        })
    }
}

/// Connection state of the MQTT listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected; waiting before the next attempt.
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected and subscribed.
    Connected,
}

/// State for tracking and controlling the listener and ingestion worker.
pub struct ListenerState {
    connection_tx: watch::Sender<ConnectionState>,
    reconnects: AtomicU64,
    received: AtomicU64,
    ingested: AtomicU64,
    malformed: AtomicU64,
    persist_failures: AtomicU64,
    dropped: AtomicU64,
    /// Channel to signal background tasks to stop.
    stop_tx: watch::Sender<bool>,
    /// Receiver for stop signal (cloned by background tasks).
    stop_rx: watch::Receiver<bool>,
}

impl ListenerState {
    pub fn new() -> Self {
        let (connection_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            connection_tx,
            reconnects: AtomicU64::new(0),
            received: AtomicU64::new(0),
            ingested: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            stop_tx,
            stop_rx,
        }
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_tx.borrow()
    }

    /// Record a connection state transition.
    pub fn set_connection_state(&self, state: ConnectionState) {
        self.connection_tx.send_replace(state);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ingested(&self) {
        self.ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            state: self.connection_state(),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            ingested: self.ingested.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Get a receiver for the stop signal.
    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Signal all background tasks to stop.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

impl Default for ListenerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time listener counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    /// Current connection state.
    pub state: ConnectionState,
    /// Connections re-established after a loss.
    pub reconnects: u64,
    /// Publish packets seen on the subscription.
    pub received: u64,
    /// Messages persisted and cached.
    pub ingested: u64,
    /// Messages rejected for a bad topic or payload.
    pub malformed: u64,
    /// Messages lost to a store failure.
    pub persist_failures: u64,
    /// Messages discarded because the ingestion queue was full.
    pub dropped: u64,
}
