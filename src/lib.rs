//! # shell-bridge
//!
//! Persistent browser terminals backed by tmux or SSH.
//!
//! A browser terminal opens a WebSocket, names the session it wants in an
//! `init` handshake and gets bound to a backend: a tmux session on this
//! host (re-attached if it is still alive), a bare shell when tmux is
//! missing, or a remote shell reached through the system `ssh` client.
//! Page reloads and network blips reconnect to the same tmux session.
//!
//! ## Features
//!
//! - **Session bridge**: WebSocket protocol with handshake, streaming and liveness
//! - **Backends**: tmux-backed local PTYs, bare shells and SSH shells
//! - **Client**: self-healing persisted tab registry and bounded reconnection
//!
//! ## Quick Start
//!
//! ```no_run
//! use shell_bridge::api::{serve_with_state, AppState, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> shell_bridge::Result<()> {
//!     shell_bridge::logging::try_init().ok();
//!
//!     let config = ServerConfig::new("127.0.0.1", 3000);
//!     serve_with_state(config, AppState::new()).await
//! }
//! ```

pub mod api;
pub mod backend;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod pty;
pub mod session;

// Re-export commonly used types
pub use api::{AppState, ClientMessage, ConnectionKind, RemoteInfo, ServerConfig, ServerMessage};
pub use backend::{BackendAdapter, Multiplexer, NoMultiplexer, TmuxMultiplexer};
pub use client::{ClientConfig, ClientEvent, ClientHandle, ConnectionStatus, SessionRecordStore};
pub use error::{BackendError, BridgeError, Result};
pub use pty::{AsyncPtyReader, AsyncPtyWriter, NativePty, PtyHandle, PtySize};
pub use session::{ConnectionId, ConnectionRegistry, ConnectionState};
