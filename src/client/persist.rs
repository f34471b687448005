//! Loading and saving the session record store.
//!
//! Every operation here is fail-soft: storage and parse failures are
//! logged and replaced by a sensible fallback, never returned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::record::SessionRecord;
use super::storage::{Storage, StorageError};
use super::store::{
    cleanup, is_at_capacity, migrate, next_name, SessionRecordStore, DEFAULT_TAB_CAP,
};
use crate::api::types::ConnectionKind;

/// Key holding the serialized store.
pub const STORAGE_KEY: &str = "terminal-sessions";
/// Key used by single-session clients.
pub const LEGACY_KEY: &str = "terminal-session-id";

const SECRET_FIELDS: [&str; 3] = ["password", "passphrase", "privateKey"];

/// How a save went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The full store did not fit; only the active record was kept.
    SavedActiveOnly,
    Failed,
}

/// Remove credential fields from a serialized store in place.
pub fn strip_secrets(value: &mut Value) {
    let Some(sessions) = value.get_mut("sessions").and_then(Value::as_array_mut) else {
        return;
    };
    for info in sessions
        .iter_mut()
        .filter_map(|s| s.get_mut("remoteInfo"))
        .filter_map(Value::as_object_mut)
    {
        for field in SECRET_FIELDS {
            info.remove(field);
        }
    }
}

/// Reads and writes a [`SessionRecordStore`] through a [`Storage`].
pub struct RecordPersistence {
    storage: Arc<dyn Storage>,
    tab_cap: usize,
    retention: Duration,
}

impl RecordPersistence {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            tab_cap: DEFAULT_TAB_CAP,
            retention: Duration::from_secs(3 * 24 * 60 * 60),
        }
    }

    pub fn with_limits(mut self, tab_cap: usize, retention: Duration) -> Self {
        self.tab_cap = tab_cap.max(1);
        self.retention = retention;
        self
    }

    pub fn tab_cap(&self) -> usize {
        self.tab_cap
    }

    /// Whether a new tab should be refused. Existing records are never
    /// dropped to honor the cap.
    pub fn is_at_capacity(&self, store: &SessionRecordStore) -> bool {
        is_at_capacity(&store.sessions, self.tab_cap)
    }

    /// Read the stored records. Missing or corrupt data yields an empty store.
    pub fn load(&self) -> SessionRecordStore {
        let raw = match self.storage.get(STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return SessionRecordStore::default(),
            Err(e) => {
                warn!("failed to read session records: {}", e);
                return SessionRecordStore::default();
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => migrate(&value),
            Err(e) => {
                warn!("discarding corrupt session records: {}", e);
                SessionRecordStore::default()
            }
        }
    }

    /// Persist `store` without secrets.
    ///
    /// If storage is full, retries with only the active record.
    pub fn save(&self, store: &SessionRecordStore) -> SaveOutcome {
        match self.write(store) {
            Ok(()) => SaveOutcome::Saved,
            Err(StorageError::QuotaExceeded { .. }) => {
                warn!("session records exceed storage quota, keeping only the active one");
                let reduced = SessionRecordStore {
                    format_version: store.format_version,
                    active_id: store.active_id.clone(),
                    sessions: store.active().cloned().into_iter().collect(),
                };
                match self.write(&reduced) {
                    Ok(()) => SaveOutcome::SavedActiveOnly,
                    Err(e) => {
                        warn!("failed to save session records: {}", e);
                        SaveOutcome::Failed
                    }
                }
            }
            Err(e) => {
                warn!("failed to save session records: {}", e);
                SaveOutcome::Failed
            }
        }
    }

    fn write(&self, store: &SessionRecordStore) -> Result<(), StorageError> {
        let mut value = serde_json::to_value(store)
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
        strip_secrets(&mut value);
        self.storage.set(STORAGE_KEY, &value.to_string())
    }

    /// Convert a single-session legacy id into a store.
    ///
    /// Returns `None` when there is nothing to migrate. The legacy key is
    /// removed either way once seen.
    pub fn migrate_legacy(&self) -> Option<SessionRecordStore> {
        let legacy = match self.storage.get(LEGACY_KEY) {
            Ok(Some(id)) => id.trim().to_string(),
            Ok(None) => return None,
            Err(e) => {
                warn!("failed to read legacy session id: {}", e);
                return None;
            }
        };

        let existing = matches!(self.storage.get(STORAGE_KEY), Ok(Some(_)));
        if let Err(e) = self.storage.remove(LEGACY_KEY) {
            warn!("failed to remove legacy session id: {}", e);
        }
        if legacy.is_empty() || existing {
            debug!("dropping legacy session id");
            return None;
        }

        info!("migrating legacy session {}", legacy);
        let mut store = SessionRecordStore::default();
        store.insert(SessionRecord::local_with_id(&legacy, "Terminal 1"));
        store.set_active(&legacy);
        self.save(&store);
        Some(store)
    }

    /// Produce the store a client starts with.
    ///
    /// Migrates legacy state or loads, drops expired and malformed records,
    /// guarantees at least one record and an active selection, and persists
    /// the result if anything changed.
    pub fn initialize(&self) -> SessionRecordStore {
        let (loaded, migrated) = match self.migrate_legacy() {
            Some(store) => (store, true),
            None => (self.load(), false),
        };

        let mut store = loaded.clone();
        store.sessions = cleanup(store.sessions, self.retention, Utc::now());
        store = store.revalidate();

        if store.sessions.is_empty() {
            let record = SessionRecord::create(
                next_name(&store.sessions, ConnectionKind::Local),
                ConnectionKind::Local,
                None,
            );
            let id = record.id.clone();
            store.insert(record);
            store.set_active(&id);
        }
        if store.active().is_none() {
            if let Some(first) = store.sessions.first().map(|r| r.id.clone()) {
                store.set_active(&first);
            }
        }

        if migrated || store != loaded {
            self.save(&store);
        }
        store
    }

    /// Replace the stored records with an empty store.
    pub fn reset(&self) -> SessionRecordStore {
        let store = SessionRecordStore::default();
        self.save(&store);
        store
    }
}
