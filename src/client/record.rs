//! Client-held session records.

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

use crate::api::types::{ConnectionKind, RemoteInfo};

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 6;

/// Current time as an RFC 3339 timestamp.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// `<millis>-<6 base36 chars>`, shared by a record id and its remote
/// backend id.
fn id_suffix(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let random: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", now.timestamp_millis(), random)
}

// A malformed `remoteInfo` drops the details, not the whole record.
fn lenient_remote_info<'de, D>(deserializer: D) -> Result<Option<RemoteInfo>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| serde_json::from_value(v).ok()))
}

/// One terminal tab as the client remembers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    /// Identity handed to the server in `init`.
    pub backend_session_id: String,
    pub created_at: String,
    pub last_accessed_at: String,
    #[serde(default)]
    pub is_active_hint: bool,
    #[serde(default)]
    pub connection_kind: ConnectionKind,
    #[serde(
        default,
        deserialize_with = "lenient_remote_info",
        skip_serializing_if = "Option::is_none"
    )]
    pub remote_info: Option<RemoteInfo>,
}

impl SessionRecord {
    /// New record with a fresh id. Secrets in `remote_info` are dropped.
    pub fn create(
        name: impl Into<String>,
        kind: ConnectionKind,
        remote_info: Option<&RemoteInfo>,
    ) -> Self {
        let now = Utc::now();
        let suffix = id_suffix(now);
        let id = format!("session-{}", suffix);
        let backend_session_id = match kind {
            ConnectionKind::Local => id.clone(),
            ConnectionKind::Remote => format!("remote-{}", suffix),
        };
        let timestamp = format_timestamp(now);

        Self {
            id,
            name: name.into(),
            backend_session_id,
            created_at: timestamp.clone(),
            last_accessed_at: timestamp,
            is_active_hint: false,
            connection_kind: kind,
            remote_info: match kind {
                ConnectionKind::Remote => remote_info.map(RemoteInfo::without_secrets),
                ConnectionKind::Local => None,
            },
        }
    }

    /// Record for a pre-existing local backend id.
    pub fn local_with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let timestamp = now_timestamp();
        Self {
            backend_session_id: id.clone(),
            id,
            name: name.into(),
            created_at: timestamp.clone(),
            last_accessed_at: timestamp,
            is_active_hint: false,
            connection_kind: ConnectionKind::Local,
            remote_info: None,
        }
    }

    pub fn last_accessed(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.last_accessed_at)
    }

    /// Whether the required identity fields are all non-empty.
    pub fn is_well_formed(&self) -> bool {
        !self.id.trim().is_empty()
            && !self.name.trim().is_empty()
            && !self.backend_session_id.trim().is_empty()
    }

    /// Move `last_accessed_at` forward to `at`; never backwards.
    pub fn touch_at(&mut self, at: &str) {
        match (self.last_accessed(), parse_timestamp(at)) {
            (Some(current), Some(next)) if next < current => {}
            (_, Some(_)) => self.last_accessed_at = at.to_string(),
            // An unparseable replacement never overwrites a usable value.
            (Some(_), None) => {}
            (None, None) => self.last_accessed_at = at.to_string(),
        }
    }

    pub fn touch(&mut self) {
        self.touch_at(&now_timestamp());
    }

    /// Apply `patch`, keeping timestamps monotonic.
    pub fn apply(&mut self, patch: SessionRecordPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(backend_session_id) = patch.backend_session_id {
            self.backend_session_id = backend_session_id;
        }
        if let Some(at) = patch.last_accessed_at {
            self.touch_at(&at);
        }
        if let Some(hint) = patch.is_active_hint {
            self.is_active_hint = hint;
        }
        if let Some(info) = patch.remote_info {
            self.remote_info = Some(info.without_secrets());
        }
    }
}

/// Partial update for [`SessionRecord::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRecordPatch {
    pub name: Option<String>,
    pub backend_session_id: Option<String>,
    pub last_accessed_at: Option<String>,
    pub is_active_hint: Option<bool>,
    pub remote_info: Option<RemoteInfo>,
}

impl SessionRecordPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn backend_session_id(id: impl Into<String>) -> Self {
        Self {
            backend_session_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn touched_now() -> Self {
        Self {
            last_accessed_at: Some(now_timestamp()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_local_record() {
        let record = SessionRecord::create("Terminal 1", ConnectionKind::Local, None);
        assert!(record.id.starts_with("session-"));
        assert_eq!(record.backend_session_id, record.id);
        assert_eq!(record.created_at, record.last_accessed_at);
        assert!(record.last_accessed().is_some());

        let suffix = record.id.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_create_remote_record_strips_secrets() {
        let info = RemoteInfo::new("example.com", 22, "dev").with_password("pw");
        let record = SessionRecord::create("Remote 1", ConnectionKind::Remote, Some(&info));

        let suffix = record.id.trim_start_matches("session-");
        assert_eq!(record.backend_session_id, format!("remote-{}", suffix));
        let stored = record.remote_info.unwrap();
        assert_eq!(stored.host, "example.com");
        assert!(!stored.has_secrets());
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let mut record = SessionRecord::local_with_id("a", "Terminal 1");
        record.last_accessed_at = "2024-05-02T00:00:00.000Z".into();

        record.touch_at("2024-05-01T00:00:00.000Z");
        assert_eq!(record.last_accessed_at, "2024-05-02T00:00:00.000Z");

        record.touch_at("2024-05-03T00:00:00.000Z");
        assert_eq!(record.last_accessed_at, "2024-05-03T00:00:00.000Z");

        record.touch_at("garbage");
        assert_eq!(record.last_accessed_at, "2024-05-03T00:00:00.000Z");
    }

    #[test]
    fn test_deserialize_lenient_fields() {
        let json = r#"{
            "id": "session-1",
            "name": "Terminal 1",
            "backendSessionId": "session-1",
            "createdAt": "2024-05-01T00:00:00Z",
            "lastAccessedAt": "2024-05-01T00:00:00Z",
            "connectionKind": "teleport",
            "remoteInfo": "not an object"
        }"#;
        let record: SessionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.connection_kind, ConnectionKind::Local);
        assert!(record.remote_info.is_none());
        assert!(!record.is_active_hint);
    }

    #[test]
    fn test_apply_patch() {
        let mut record = SessionRecord::local_with_id("a", "Terminal 1");
        record.apply(SessionRecordPatch::name("build"));
        assert_eq!(record.name, "build");
        assert_eq!(record.backend_session_id, "a");

        record.apply(SessionRecordPatch::backend_session_id("b"));
        assert_eq!(record.backend_session_id, "b");
        assert_eq!(record.id, "a");
    }
}
