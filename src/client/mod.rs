//! Client side of the bridge.
//!
//! This module contains:
//! - The persisted session record store (one record per terminal tab)
//! - Storage backends for it
//! - The reconnection controller and its transport
//!
//! A typical client initializes the store, picks the active record and
//! spawns a client task for it:
//!
//! ```no_run
//! use std::sync::Arc;
//! use shell_bridge::client::{
//!     spawn_client, ClientConfig, FileStorage, RecordPersistence, SessionTarget,
//!     WebSocketConnector,
//! };
//!
//! # async fn run() {
//! let persistence = RecordPersistence::new(Arc::new(FileStorage::new("/tmp/shell-bridge")));
//! let store = persistence.initialize();
//! let target = store
//!     .active()
//!     .map(|record| SessionTarget::from_record(record, None))
//!     .unwrap_or_else(|| SessionTarget::local(None));
//!
//! let connector = Arc::new(WebSocketConnector::new("ws://127.0.0.1:3000/ws"));
//! let (handle, mut events) = spawn_client(connector, target, ClientConfig::default());
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! handle.close(false).await;
//! # }
//! ```

mod persist;
mod reconnect;
mod record;
mod resize;
mod storage;
mod store;
mod transport;

use std::time::Duration;

pub use persist::{strip_secrets, RecordPersistence, SaveOutcome, LEGACY_KEY, STORAGE_KEY};
pub use reconnect::{
    spawn_client, Action, ClientEvent, ClientHandle, ConnectionStatus, ReconnectController,
    SessionTarget,
};
pub use record::{format_timestamp, now_timestamp, parse_timestamp, SessionRecord, SessionRecordPatch};
pub use resize::ResizeDebouncer;
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
pub use store::{
    cleanup, is_at_capacity, migrate, next_name, validate, SessionRecordStore,
    CURRENT_FORMAT_VERSION, DEFAULT_TAB_CAP,
};
pub use transport::{Connector, Transport, WebSocketConnector};

/// Client-side limits and timings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Maximum number of tabs.
    pub tab_cap: usize,
    /// Records not accessed for this long are dropped.
    pub retention: Duration,
    /// Consecutive losses before giving up.
    pub max_reconnect_attempts: u32,
    /// Fixed delay between reconnects.
    pub reconnect_delay: Duration,
    /// Transport establishment timeout.
    pub connect_timeout: Duration,
    pub resize_debounce: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tab_cap: DEFAULT_TAB_CAP,
            retention: Duration::from_secs(3 * 24 * 60 * 60),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
            resize_debounce: Duration::from_millis(100),
        }
    }
}

impl ClientConfig {
    /// Record persistence honoring these limits.
    pub fn persistence(&self, storage: std::sync::Arc<dyn Storage>) -> RecordPersistence {
        RecordPersistence::new(storage).with_limits(self.tab_cap, self.retention)
    }
}
