//! Connection identifier type.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for connection ID generation.
static COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifier for one live transport.
///
/// A fresh ID is generated for every attach attempt, so it never collides
/// with the client-facing session identity. Displayed as `conn-XXXXXXXX`
/// where X is a hexadecimal digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a new unique connection ID.
    pub fn new() -> Self {
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Create a ConnectionId from a raw u64 value.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{:08x}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = crate::error::BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("conn-")
            .and_then(|hex| u64::from_str_radix(hex, 16).ok())
            .map(ConnectionId)
            .ok_or_else(|| crate::error::BridgeError::ConnectionNotFound(s.into()))
    }
}
