//! The client's tab registry and its pure operations.
//!
//! Nothing here touches storage; see [`persist`](super::persist) for that.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::record::{now_timestamp, SessionRecord, SessionRecordPatch};
use crate::api::types::ConnectionKind;

/// Layout version written by this build.
pub const CURRENT_FORMAT_VERSION: u32 = 1;

/// Default maximum number of tabs.
pub const DEFAULT_TAB_CAP: usize = 5;

/// Ordered set of session records plus the active selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecordStore {
    pub format_version: u32,
    pub active_id: Option<String>,
    /// Display order.
    pub sessions: Vec<SessionRecord>,
}

impl Default for SessionRecordStore {
    fn default() -> Self {
        Self {
            format_version: CURRENT_FORMAT_VERSION,
            active_id: None,
            sessions: Vec::new(),
        }
    }
}

impl SessionRecordStore {
    pub fn get(&self, id: &str) -> Option<&SessionRecord> {
        self.sessions.iter().find(|r| r.id == id)
    }

    pub fn active(&self) -> Option<&SessionRecord> {
        self.active_id.as_deref().and_then(|id| self.get(id))
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.sessions.iter().position(|r| r.id == id)
    }

    /// Append a record. Returns `false` (and leaves the store alone) when the
    /// id is already taken.
    pub fn insert(&mut self, record: SessionRecord) -> bool {
        if self.position(&record.id).is_some() {
            return false;
        }
        self.sessions.push(record);
        true
    }

    /// Merge `patch` into the record with this id. Unknown ids are a no-op.
    pub fn update(&mut self, id: &str, patch: SessionRecordPatch) -> bool {
        match self.sessions.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.apply(patch);
                true
            }
            None => false,
        }
    }

    /// Remove a record, clearing the active id if it pointed at it.
    pub fn delete(&mut self, id: &str) -> Option<SessionRecord> {
        let pos = self.position(id)?;
        if self.active_id.as_deref() == Some(id) {
            self.active_id = None;
        }
        Some(self.sessions.remove(pos))
    }

    /// Make `id` the active record and refresh its access time.
    pub fn set_active(&mut self, id: &str) -> bool {
        if self.position(id).is_none() {
            return false;
        }
        let now = now_timestamp();
        for record in &mut self.sessions {
            record.is_active_hint = record.id == id;
            if record.id == id {
                record.touch_at(&now);
            }
        }
        self.active_id = Some(id.to_string());
        true
    }

    /// Move the record at `from` to `to`. Out-of-range indices are a no-op.
    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        let len = self.sessions.len();
        if from >= len || to >= len {
            return false;
        }
        if from != to {
            let record = self.sessions.remove(from);
            self.sessions.insert(to, record);
        }
        true
    }

    /// Rename a record. Blank names are rejected.
    pub fn rename(&mut self, id: &str, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.update(id, SessionRecordPatch::name(name))
    }

    /// Enforce the structural invariants on an already-typed store.
    pub fn revalidate(self) -> Self {
        let format_version = self.format_version;
        let value = serde_json::to_value(&self).unwrap_or(Value::Null);
        Self {
            format_version,
            ..validate(&value)
        }
    }
}

/// Drop records not accessed within `max_age` of `now`.
///
/// Records whose timestamp cannot be parsed are kept.
pub fn cleanup(
    sessions: Vec<SessionRecord>,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Vec<SessionRecord> {
    let Ok(max_age) = chrono::Duration::from_std(max_age) else {
        return sessions;
    };
    sessions
        .into_iter()
        .filter(|record| match record.last_accessed() {
            Some(at) => {
                let expired = now.signed_duration_since(at) > max_age;
                if expired {
                    debug!("dropping expired session record {}", record.id);
                }
                !expired
            }
            None => true,
        })
        .collect()
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Build a store from untrusted JSON, dropping whatever does not fit.
///
/// Records that are not objects or lack `id`, `name` or `backendSessionId`
/// are dropped, duplicate ids keep the first occurrence, a missing
/// `connectionKind` becomes local and a dangling `activeId` is cleared.
pub fn validate(raw: &Value) -> SessionRecordStore {
    let mut store = SessionRecordStore::default();
    let Some(obj) = raw.as_object() else {
        return store;
    };

    let entries = obj
        .get("sessions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut seen = HashSet::new();
    for entry in entries {
        let Some(fields) = entry.as_object() else {
            warn!("dropping session record that is not an object");
            continue;
        };
        let (Some(id), Some(_), Some(_)) = (
            non_empty_str(fields, "id"),
            non_empty_str(fields, "name"),
            non_empty_str(fields, "backendSessionId"),
        ) else {
            warn!("dropping session record with missing fields");
            continue;
        };
        if !seen.insert(id.to_string()) {
            warn!("dropping duplicate session record {}", id);
            continue;
        }

        let mut fields = fields.clone();
        for key in ["createdAt", "lastAccessedAt"] {
            if !fields.get(key).is_some_and(Value::is_string) {
                fields.insert(key.to_string(), Value::String(now_timestamp()));
            }
        }
        match serde_json::from_value::<SessionRecord>(Value::Object(fields)) {
            Ok(mut record) => {
                if let Some(info) = record.remote_info.take() {
                    record.remote_info = Some(info.without_secrets());
                }
                store.sessions.push(record);
            }
            Err(e) => warn!("dropping malformed session record {}: {}", id, e),
        }
    }

    store.active_id = obj
        .get("activeId")
        .and_then(Value::as_str)
        .filter(|id| store.sessions.iter().any(|r| r.id == *id))
        .map(String::from);
    store
}

/// Bring persisted JSON up to the current layout.
///
/// Version 0 (or missing) predates remote sessions: records without a
/// usable `connectionKind` become local, explicit kinds are kept. A newer version than this build understands is read as-is and
/// keeps its version number.
pub fn migrate(raw: &Value) -> SessionRecordStore {
    let version = raw
        .get("formatVersion")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    if version == 0 {
        let mut upgraded = raw.clone();
        if let Some(sessions) = upgraded.get_mut("sessions").and_then(Value::as_array_mut) {
            for record in sessions.iter_mut().filter_map(Value::as_object_mut) {
                let known = matches!(
                    record.get("connectionKind").and_then(Value::as_str),
                    Some("local" | "remote")
                );
                if !known {
                    record.insert(
                        "connectionKind".to_string(),
                        Value::String(ConnectionKind::Local.as_str().to_string()),
                    );
                }
            }
        }
        debug!("migrated session records from version 0");
        return validate(&upgraded);
    }

    let mut store = validate(raw);
    if version > u64::from(CURRENT_FORMAT_VERSION) {
        warn!(
            "session records have format version {}, newer than {}",
            version, CURRENT_FORMAT_VERSION
        );
        store.format_version = u32::try_from(version).unwrap_or(u32::MAX);
    }
    store
}

/// Next default tab name: `Terminal N` or `Remote N` with N one past the
/// highest existing number.
pub fn next_name(existing: &[SessionRecord], kind: ConnectionKind) -> String {
    let prefix = match kind {
        ConnectionKind::Local => "Terminal",
        ConnectionKind::Remote => "Remote",
    };
    let highest = existing
        .iter()
        .filter_map(|r| r.name.strip_prefix(prefix))
        .filter_map(|rest| rest.strip_prefix(' '))
        .filter_map(|n| n.trim().parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("{} {}", prefix, highest + 1)
}

pub fn is_at_capacity(sessions: &[SessionRecord], cap: usize) -> bool {
    sessions.len() >= cap
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, name: &str) -> SessionRecord {
        SessionRecord::local_with_id(id, name)
    }

    fn store_of(records: Vec<SessionRecord>) -> SessionRecordStore {
        SessionRecordStore {
            sessions: records,
            ..SessionRecordStore::default()
        }
    }

    #[test]
    fn test_validate_drops_bad_records_and_dangling_active() {
        let raw = json!({
            "formatVersion": 1,
            "activeId": "gone",
            "sessions": [
                {"id": "a", "name": "Terminal 1", "backendSessionId": "a",
                 "createdAt": "2024-05-01T00:00:00Z", "lastAccessedAt": "2024-05-01T00:00:00Z"},
                {"id": "", "name": "x", "backendSessionId": "y"},
                {"name": "no id", "backendSessionId": "z"},
                "not an object",
                42,
                {"id": "a", "name": "dup", "backendSessionId": "a"},
                {"id": "b", "name": "Terminal 2", "backendSessionId": "b", "connectionKind": 7}
            ]
        });

        let store = validate(&raw);
        let ids: Vec<&str> = store.sessions.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(store.sessions[0].name, "Terminal 1");
        assert_eq!(store.sessions[1].connection_kind, ConnectionKind::Local);
        assert!(store.active_id.is_none());
        for r in &store.sessions {
            assert!(r.is_well_formed());
        }
    }

    #[test]
    fn test_validate_keeps_valid_active() {
        let raw = json!({
            "formatVersion": 1,
            "activeId": "a",
            "sessions": [{"id": "a", "name": "Terminal 1", "backendSessionId": "a"}]
        });
        assert_eq!(validate(&raw).active_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_validate_non_object() {
        assert_eq!(validate(&json!([1, 2])), SessionRecordStore::default());
        assert_eq!(validate(&Value::Null), SessionRecordStore::default());
    }

    #[test]
    fn test_migrate_version_zero_injects_local_kind() {
        let raw = json!({
            "activeId": "a",
            "sessions": [
                {"id": "a", "name": "Terminal 1", "backendSessionId": "a",
                 "createdAt": "2024-05-01T00:00:00Z", "lastAccessedAt": "2024-05-01T00:00:00Z"},
                {"id": "b", "name": "Terminal 2", "backendSessionId": "b",
                 "connectionKind": "tty",
                 "createdAt": "2024-05-01T00:00:00Z", "lastAccessedAt": "2024-05-01T00:00:00Z"}
            ]
        });
        let store = migrate(&raw);
        assert_eq!(store.format_version, CURRENT_FORMAT_VERSION);
        assert_eq!(store.sessions[0].connection_kind, ConnectionKind::Local);
        assert_eq!(store.sessions[1].connection_kind, ConnectionKind::Local);
        assert_eq!(store.active_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_migrate_version_zero_keeps_remote_kind() {
        let raw = json!({
            "sessions": [{
                "id": "r", "name": "Remote 1", "backendSessionId": "remote-abc",
                "connectionKind": "remote",
                "remoteInfo": {"host": "example.com", "port": 22, "username": "dev"},
                "createdAt": "2024-05-01T00:00:00Z", "lastAccessedAt": "2024-05-01T00:00:00Z"
            }]
        });
        let store = migrate(&raw);
        let record = &store.sessions[0];
        assert_eq!(record.connection_kind, ConnectionKind::Remote);
        assert_eq!(record.backend_session_id, "remote-abc");
        assert!(record.remote_info.is_some());
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let raw = json!({
            "sessions": [
                {"id": "a", "name": "Terminal 1", "backendSessionId": "a",
                 "createdAt": "2024-05-01T00:00:00Z", "lastAccessedAt": "2024-05-01T00:00:00Z"},
                {"id": "a", "name": "dup", "backendSessionId": "a"}
            ]
        });
        let once = migrate(&raw);
        let twice = migrate(&serde_json::to_value(&once).unwrap());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_migrate_future_version_passes_through() {
        let raw = json!({
            "formatVersion": 9,
            "sessions": [{"id": "a", "name": "Remote 1", "backendSessionId": "remote-a",
                          "connectionKind": "remote",
                          "createdAt": "2024-05-01T00:00:00Z",
                          "lastAccessedAt": "2024-05-01T00:00:00Z"}]
        });
        let store = migrate(&raw);
        assert_eq!(store.format_version, 9);
        assert_eq!(store.sessions[0].connection_kind, ConnectionKind::Remote);
    }

    #[test]
    fn test_cleanup_keeps_recent_and_unparseable() {
        let now = DateTime::parse_from_rfc3339("2024-05-10T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let mut old = record("old", "Terminal 1");
        old.last_accessed_at = "2024-05-01T00:00:00Z".into();
        let mut recent = record("recent", "Terminal 2");
        recent.last_accessed_at = "2024-05-09T00:00:00Z".into();
        let mut broken = record("broken", "Terminal 3");
        broken.last_accessed_at = "yesterday-ish".into();

        let kept = cleanup(
            vec![old, recent, broken],
            Duration::from_secs(3 * 24 * 60 * 60),
            now,
        );
        let ids: Vec<&str> = kept.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["recent", "broken"]);
    }

    #[test]
    fn test_next_name_uses_highest_number() {
        let existing = vec![record("a", "Terminal 1"), record("b", "Terminal 3")];
        assert_eq!(next_name(&existing, ConnectionKind::Local), "Terminal 4");
        assert_eq!(next_name(&[], ConnectionKind::Local), "Terminal 1");
        assert_eq!(next_name(&existing, ConnectionKind::Remote), "Remote 1");

        let custom = vec![record("a", "build"), record("b", "Terminal x")];
        assert_eq!(next_name(&custom, ConnectionKind::Local), "Terminal 1");
    }

    #[test]
    fn test_capacity() {
        let four: Vec<SessionRecord> = (0..4).map(|i| record(&i.to_string(), "t")).collect();
        assert!(!is_at_capacity(&four, DEFAULT_TAB_CAP));
        let five: Vec<SessionRecord> = (0..5).map(|i| record(&i.to_string(), "t")).collect();
        assert!(is_at_capacity(&five, DEFAULT_TAB_CAP));
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let mut store = store_of(vec![record("a", "Terminal 1")]);
        let before = store.clone();
        assert!(!store.update("zzz", SessionRecordPatch::name("x")));
        assert_eq!(store, before);
    }

    #[test]
    fn test_delete_clears_active() {
        let mut store = store_of(vec![record("a", "Terminal 1"), record("b", "Terminal 2")]);
        store.set_active("a");

        assert!(store.delete("b").is_some());
        assert_eq!(store.active_id.as_deref(), Some("a"));

        assert!(store.delete("a").is_some());
        assert!(store.active_id.is_none());
        assert!(store.delete("a").is_none());
    }

    #[test]
    fn test_set_active_updates_hints() {
        let mut store = store_of(vec![record("a", "Terminal 1"), record("b", "Terminal 2")]);
        assert!(store.set_active("b"));
        assert_eq!(store.active().map(|r| r.id.as_str()), Some("b"));
        assert!(!store.sessions[0].is_active_hint);
        assert!(store.sessions[1].is_active_hint);
        assert!(!store.set_active("missing"));
    }

    #[test]
    fn test_reorder_and_rename() {
        let mut store = store_of(vec![
            record("a", "Terminal 1"),
            record("b", "Terminal 2"),
            record("c", "Terminal 3"),
        ]);
        assert!(store.reorder(2, 0));
        let ids: Vec<&str> = store.sessions.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
        assert!(!store.reorder(0, 3));

        assert!(store.rename("a", "  logs "));
        assert_eq!(store.get("a").unwrap().name, "logs");
        assert!(!store.rename("a", "   "));
        assert_eq!(store.get("a").unwrap().name, "logs");
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let mut store = store_of(vec![record("a", "Terminal 1")]);
        assert!(!store.insert(record("a", "other")));
        assert_eq!(store.sessions.len(), 1);
    }
}
