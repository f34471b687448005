//! Client record store integration tests.
//!
//! These tests run the persisted tab registry against file-backed storage.

use std::sync::Arc;

use shell_bridge::client::{
    next_name, ClientConfig, FileStorage, RecordPersistence, SessionRecord, SessionTarget,
    Storage, LEGACY_KEY, STORAGE_KEY,
};
use shell_bridge::{ConnectionKind, RemoteInfo};

fn persistence(dir: &tempfile::TempDir) -> (Arc<FileStorage>, RecordPersistence) {
    let storage = Arc::new(FileStorage::new(dir.path()));
    let persistence = ClientConfig::default().persistence(storage.clone());
    (storage, persistence)
}

#[test]
fn test_legacy_client_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    let (storage, persistence) = persistence(&dir);
    storage.set(LEGACY_KEY, "session-legacy").unwrap();

    let store = persistence.initialize();

    assert_eq!(store.sessions.len(), 1);
    assert_eq!(store.sessions[0].backend_session_id, "session-legacy");
    assert_eq!(store.active_id.as_deref(), Some("session-legacy"));
    assert_eq!(storage.get(LEGACY_KEY).unwrap(), None);

    // A second start reads the same state back.
    let again = persistence.initialize();
    assert_eq!(again.sessions, store.sessions);
    assert_eq!(again.active_id, store.active_id);
}

#[test]
fn test_tabs_persist_without_secrets() {
    let dir = tempfile::tempdir().unwrap();
    let (storage, persistence) = persistence(&dir);

    let mut store = persistence.initialize();
    let info = RemoteInfo::new("build.example.com", 2222, "ci").with_password("s3cret");
    let remote = SessionRecord::create(
        next_name(&store.sessions, ConnectionKind::Remote),
        ConnectionKind::Remote,
        Some(&info),
    );
    let remote_id = remote.id.clone();
    assert!(store.insert(remote));
    assert!(store.set_active(&remote_id));
    persistence.save(&store);

    let raw = storage.get(STORAGE_KEY).unwrap().unwrap();
    assert!(!raw.contains("s3cret"));

    let reloaded = persistence.load();
    let record = reloaded.get(&remote_id).unwrap();
    assert_eq!(record.name, "Remote 1");
    assert!(record.backend_session_id.starts_with("remote-"));
    assert_eq!(reloaded.active_id.as_deref(), Some(remote_id.as_str()));

    // Reconnecting needs the password supplied again.
    let target = SessionTarget::from_record(record, Some(info.clone()));
    assert_eq!(target.remote_info.as_ref(), Some(&info));
    assert_eq!(
        target.backend_session_id.as_deref(),
        Some(record.backend_session_id.as_str())
    );
}

#[test]
fn test_corrupt_state_file_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let (storage, persistence) = persistence(&dir);
    storage.set(STORAGE_KEY, "\u{0}\u{1}garbage").unwrap();

    let store = persistence.initialize();
    assert_eq!(store.sessions.len(), 1);
    assert_eq!(store.sessions[0].name, "Terminal 1");

    let fresh = RecordPersistence::new(storage);
    assert_eq!(fresh.load().sessions, store.sessions);
}
