//! API layer for shell-bridge.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /api/v1/` - API information
//! - `GET /api/v1/sessions` - Live multiplexer sessions and open connections
//! - `WS /ws`, `WS /api/v1/ws` - Terminal bridge
//!
//! ## Example
//!
//! ```no_run
//! use shell_bridge::api::{serve, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> shell_bridge::Result<()> {
//!     let config = ServerConfig::new("127.0.0.1", 3000);
//!     serve(config).await
//! }
//! ```

pub mod handlers;
pub mod router;
pub mod types;
pub mod websocket;

pub use handlers::AppState;
pub use router::{create_router, create_router_with_state, serve, serve_with_state, ServerConfig};
pub use types::{
    AuthMethod, ClientMessage, ConnectionKind, ListSessionsResponse, RemoteInfo, ServerMessage,
};
pub use websocket::BridgeSettings;
