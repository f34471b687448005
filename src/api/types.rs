//! Wire types for the bridge protocol.
//!
//! Every frame is a JSON text message tagged by `type` (snake_case) with
//! camelCase fields. Client and server each get their own tagged union so
//! malformed or unknown frames are rejected at the boundary.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::BridgeError;

/// Which backend a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// Local PTY, tmux-backed when available.
    #[default]
    Local,
    /// Remote shell over SSH.
    Remote,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Anything that is not exactly "remote" is treated as local, so a bad value
// never invalidates the whole record or message.
impl<'de> Deserialize<'de> for ConnectionKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(match raw.as_ref().and_then(|v| v.as_str()) {
            Some("remote") => ConnectionKind::Remote,
            _ => ConnectionKind::Local,
        })
    }
}

/// How the remote shell authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthMethod {
    #[default]
    Password,
    PrivateKey,
}

fn default_ssh_port() -> u16 {
    22
}

/// Remote connection details.
///
/// `password`, `private_key` and `passphrase` only ever travel in the
/// handshake; they are stripped before anything is persisted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInfo {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

impl RemoteInfo {
    /// Create connection details without any credentials.
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth_method: AuthMethod::Password,
            password: None,
            private_key: None,
            passphrase: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.auth_method = AuthMethod::Password;
        self.password = Some(password.into());
        self
    }

    pub fn with_private_key(mut self, key: impl Into<String>, passphrase: Option<String>) -> Self {
        self.auth_method = AuthMethod::PrivateKey;
        self.private_key = Some(key.into());
        self.passphrase = passphrase;
        self
    }

    /// Copy with every secret field removed.
    pub fn without_secrets(&self) -> Self {
        Self {
            password: None,
            private_key: None,
            passphrase: None,
            ..self.clone()
        }
    }

    /// Whether any secret field is present.
    pub fn has_secrets(&self) -> bool {
        self.password.is_some() || self.private_key.is_some() || self.passphrase.is_some()
    }

    /// `host:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for RemoteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("RemoteInfo")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("auth_method", &self.auth_method)
            .field("password", &redact(&self.password))
            .field("private_key", &redact(&self.private_key))
            .field("passphrase", &redact(&self.passphrase))
            .finish()
    }
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Handshake naming the desired session identity and backend kind.
    Init {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backend_session_id: Option<String>,
        #[serde(default)]
        connection_kind: ConnectionKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote_info: Option<RemoteInfo>,
    },
    /// Keystrokes for the backend.
    Input { data: String },
    /// Terminal geometry change.
    Resize { cols: u16, rows: u16 },
    /// Destroy the named backend, not just this transport.
    CloseSession { backend_session_id: String },
    /// Ask for the live local multiplexer sessions.
    ListSessions,
}

impl ClientMessage {
    /// Parse a text frame; failures are protocol violations.
    pub fn parse(text: &str) -> crate::Result<Self> {
        serde_json::from_str(text).map_err(|e| BridgeError::Protocol(e.to_string()))
    }

    /// Handshake for a new local session.
    pub fn new_local() -> Self {
        Self::Init {
            backend_session_id: None,
            connection_kind: ConnectionKind::Local,
            remote_info: None,
        }
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Handshake answer: which backend the transport is bound to.
    SessionInfo {
        resolved_id: String,
        is_new: bool,
        backend_available: bool,
        connection_kind: ConnectionKind,
    },
    /// Backend output chunk.
    Output { data: String },
    /// Fatal or advisory error.
    Error { code: String, message: String },
    /// The backend's working directory changed.
    CurrentDirectory { directory: String },
    /// Live local multiplexer sessions.
    SessionsList { sessions: Vec<String> },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Parse a text frame; failures are protocol violations.
    pub fn parse(text: &str) -> crate::Result<Self> {
        serde_json::from_str(text).map_err(|e| BridgeError::Protocol(e.to_string()))
    }

    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| BridgeError::Protocol(e.to_string()))
    }
}

/// Response for `GET /api/v1/sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct ListSessionsResponse {
    /// Whether a multiplexer is installed on the host.
    pub multiplexer_available: bool,
    /// Live multiplexer session names.
    pub sessions: Vec<String>,
    /// Number of open bridge connections.
    pub connections: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_parse_minimal() {
        let msg = ClientMessage::parse(r#"{"type": "init"}"#).unwrap();
        assert_eq!(msg, ClientMessage::new_local());
    }

    #[test]
    fn test_init_parse_with_identity() {
        let json = r#"{"type":"init","backendSessionId":"session-1","connectionKind":"local"}"#;
        match ClientMessage::parse(json).unwrap() {
            ClientMessage::Init {
                backend_session_id,
                connection_kind,
                remote_info,
            } => {
                assert_eq!(backend_session_id.as_deref(), Some("session-1"));
                assert_eq!(connection_kind, ConnectionKind::Local);
                assert!(remote_info.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_init_parse_remote() {
        let json = r#"{
            "type": "init",
            "connectionKind": "remote",
            "remoteInfo": {"host": "example.com", "username": "dev", "password": "pw"}
        }"#;
        match ClientMessage::parse(json).unwrap() {
            ClientMessage::Init {
                connection_kind,
                remote_info: Some(info),
                ..
            } => {
                assert_eq!(connection_kind, ConnectionKind::Remote);
                assert_eq!(info.port, 22);
                assert_eq!(info.address(), "example.com:22");
                assert_eq!(info.password.as_deref(), Some("pw"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_protocol_violation() {
        let err = ClientMessage::parse(r#"{"type": "explode"}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
        assert!(ClientMessage::parse("not json").is_err());
        assert!(ClientMessage::parse(r#"{"type": "resize", "cols": "wide"}"#).is_err());
    }

    #[test]
    fn test_close_session_parse() {
        let msg =
            ClientMessage::parse(r#"{"type":"close_session","backendSessionId":"s-1"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::CloseSession {
                backend_session_id: "s-1".into()
            }
        );
    }

    #[test]
    fn test_session_info_wire_format() {
        let msg = ServerMessage::SessionInfo {
            resolved_id: "term-1".into(),
            is_new: false,
            backend_available: true,
            connection_kind: ConnectionKind::Local,
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "session_info");
        assert_eq!(json["resolvedId"], "term-1");
        assert_eq!(json["isNew"], false);
        assert_eq!(json["backendAvailable"], true);
        assert_eq!(json["connectionKind"], "local");
    }

    #[test]
    fn test_current_directory_wire_format() {
        let msg = ServerMessage::CurrentDirectory {
            directory: "/tmp".into(),
        };
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"type":"current_directory","directory":"/tmp"}"#
        );
    }

    #[test]
    fn test_unknown_connection_kind_defaults_to_local() {
        let kind: ConnectionKind = serde_json::from_str(r#""serial""#).unwrap();
        assert_eq!(kind, ConnectionKind::Local);
        let kind: ConnectionKind = serde_json::from_str("null").unwrap();
        assert_eq!(kind, ConnectionKind::Local);
    }

    #[test]
    fn test_remote_info_secrets() {
        let info = RemoteInfo::new("h", 2222, "u").with_private_key("KEY", Some("pp".into()));
        assert!(info.has_secrets());
        assert_eq!(info.auth_method, AuthMethod::PrivateKey);

        let clean = info.without_secrets();
        assert!(!clean.has_secrets());
        assert_eq!(clean.auth_method, AuthMethod::PrivateKey);

        let json = serde_json::to_string(&clean).unwrap();
        assert!(!json.contains("privateKey\":"));
        assert!(!json.contains("passphrase"));
    }

    #[test]
    fn test_remote_info_debug_redacts() {
        let info = RemoteInfo::new("h", 22, "u").with_password("hunter2");
        let debug = format!("{:?}", info);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
