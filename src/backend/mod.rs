//! Backend adapter.
//!
//! Turns a handshake into a running terminal: a local PTY (tmux-backed when
//! available) or a remote shell over SSH. Everything above this module talks
//! to [`Backend`] and never branches on the connection kind itself.

pub mod local;
pub mod multiplexer;
pub mod remote;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

pub use local::{LocalBackend, LocalPlan};
pub use multiplexer::{is_valid_session_name, Multiplexer, NoMultiplexer, TmuxMultiplexer};
pub use remote::RemoteBackend;

use crate::api::types::{ConnectionKind, RemoteInfo};
use crate::error::BackendError;
use crate::pty::{ByteStream, PtySize, DEFAULT_TERM};

/// Settings applied to every new backend.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Initial terminal geometry.
    pub size: PtySize,
    /// `TERM` exported to the backend.
    pub term: String,
    /// Upper bound on a remote login.
    pub remote_timeout: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            size: PtySize::default(),
            term: DEFAULT_TERM.to_string(),
            remote_timeout: Duration::from_secs(30),
        }
    }
}

/// What the client asked for in its handshake.
#[derive(Debug, Clone, Default)]
pub struct AttachRequest {
    pub kind: ConnectionKind,
    pub backend_session_id: Option<String>,
    pub remote_info: Option<RemoteInfo>,
}

impl AttachRequest {
    pub fn local(backend_session_id: Option<String>) -> Self {
        Self {
            kind: ConnectionKind::Local,
            backend_session_id,
            remote_info: None,
        }
    }

    pub fn remote(info: RemoteInfo) -> Self {
        Self {
            kind: ConnectionKind::Remote,
            backend_session_id: None,
            remote_info: Some(info),
        }
    }
}

/// Result of a successful attach.
pub struct Attached {
    /// Backend id the transport is now bound to.
    pub resolved_id: String,
    /// `false` only when an existing backend was reattached.
    pub is_new: bool,
    /// Whether the backend can be reattached later.
    pub backend_available: bool,
    pub backend: Backend,
    pub stream: ByteStream,
}

/// A running terminal backend.
pub enum Backend {
    Local(LocalBackend),
    Remote(RemoteBackend),
}

impl Backend {
    pub fn kind(&self) -> ConnectionKind {
        match self {
            Self::Local(_) => ConnectionKind::Local,
            Self::Remote(_) => ConnectionKind::Remote,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::Local(b) => b.session_id(),
            Self::Remote(b) => b.session_id(),
        }
    }

    pub fn resize(&self, cols: u16, rows: u16) -> crate::Result<()> {
        let size = PtySize::new(rows, cols).clamped();
        match self {
            Self::Local(b) => b.resize(size),
            Self::Remote(b) => b.resize(size),
        }
    }

    /// Destroy the backend entirely.
    pub async fn terminate(&self) {
        match self {
            Self::Local(b) => b.terminate().await,
            Self::Remote(b) => b.terminate(),
        }
    }

    /// The transport went away: detach from multiplexer sessions, terminate
    /// everything else.
    pub async fn release(&self) {
        match self {
            Self::Local(b) => b.release().await,
            Self::Remote(b) => b.terminate(),
        }
    }

    /// Whether the bridge should poll for working-directory changes.
    pub fn tracks_directory(&self) -> bool {
        matches!(self, Self::Local(b) if b.is_persistent())
    }

    pub async fn current_directory(&self) -> Option<String> {
        match self {
            Self::Local(b) => b.current_directory().await,
            Self::Remote(_) => None,
        }
    }
}

/// Creates and reattaches backends.
pub struct BackendAdapter {
    mux: Arc<dyn Multiplexer>,
    options: BackendOptions,
}

impl BackendAdapter {
    pub fn new(mux: Arc<dyn Multiplexer>, options: BackendOptions) -> Self {
        Self { mux, options }
    }

    pub fn options(&self) -> &BackendOptions {
        &self.options
    }

    pub fn multiplexer(&self) -> &Arc<dyn Multiplexer> {
        &self.mux
    }

    pub async fn multiplexer_available(&self) -> bool {
        self.mux.is_available().await
    }

    /// Attach to the requested backend, creating it if needed.
    ///
    /// Local requests always succeed unless no PTY can be allocated at all.
    pub async fn attach_or_create(&self, request: AttachRequest) -> Result<Attached, BackendError> {
        match request.kind {
            ConnectionKind::Local => {
                let plan = local::plan(self.mux.as_ref(), request.backend_session_id.as_deref()).await;
                let (backend, stream, is_new) =
                    LocalBackend::start(Arc::clone(&self.mux), &plan, &self.options)?;
                Ok(Attached {
                    resolved_id: backend.session_id().to_string(),
                    is_new,
                    backend_available: backend.is_persistent(),
                    backend: Backend::Local(backend),
                    stream,
                })
            }
            ConnectionKind::Remote => {
                let info = request.remote_info.ok_or_else(|| {
                    BackendError::InvalidCredentials("remote connection details are missing".into())
                })?;
                let (backend, stream) = RemoteBackend::connect(&info, &self.options).await?;
                Ok(Attached {
                    resolved_id: backend.session_id().to_string(),
                    is_new: true,
                    backend_available: true,
                    backend: Backend::Remote(backend),
                    stream,
                })
            }
        }
    }

    /// Live multiplexer session names.
    pub async fn list_sessions(&self) -> Vec<String> {
        self.mux.list_sessions().await
    }

    /// Kill the named multiplexer session. Returns `true` if one existed.
    pub async fn destroy_session(&self, backend_session_id: &str) -> bool {
        let killed = self.mux.kill_session(backend_session_id).await;
        if killed {
            info!("{} session {} destroyed", self.mux.name(), backend_session_id);
        }
        killed
    }
}
