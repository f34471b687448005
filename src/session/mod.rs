//! Server-side connection tracking.
//!
//! This module provides the per-transport state machine, connection
//! identifiers, working-directory tracking and the registry that maps
//! connection IDs to live connections.

mod directory;
mod id;
mod registry;
mod state;

pub use directory::{parse_directory, DirectoryTracker};
pub use id::ConnectionId;
pub use registry::{Control, ConnectionRegistry, Liveness, RegisteredConnection, SweepReport};
pub use state::ConnectionState;
