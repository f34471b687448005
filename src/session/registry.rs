//! Registry of live bridge connections.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ConnectionId;
use crate::api::types::ConnectionKind;
use crate::error::BridgeError;
use crate::Result;

/// Out-of-band requests delivered to a connection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Send a transport-level ping.
    Ping,
    /// Close the transport and release the backend.
    Terminate,
}

/// Last time the client proved it was alive.
#[derive(Debug)]
pub struct Liveness {
    last_seen: Mutex<Instant>,
}

impl Liveness {
    fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Record a pong (or any other sign of life).
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_seen.lock() {
            *last = Instant::now();
        }
    }

    /// Time since the client last answered.
    pub fn idle(&self) -> Duration {
        self.last_seen
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }
}

/// Registry view of one connection.
///
/// The backend handle is not here: it stays with the task that owns the
/// transport. The registry only carries what the sweeper and cross-connection
/// requests need.
#[derive(Debug, Clone)]
pub struct RegisteredConnection {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Backend kind bound to this connection.
    pub backend_kind: ConnectionKind,
    /// Multiplexer or remote session name.
    pub backend_session_id: String,
    /// When the handshake completed.
    pub connected_at: Instant,
    liveness: Arc<Liveness>,
    control: mpsc::Sender<Control>,
}

impl RegisteredConnection {
    /// Time since the client last answered a ping.
    pub fn idle_duration(&self) -> Duration {
        self.liveness.idle()
    }
}

/// Outcome of one liveness sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections that were pinged.
    pub pinged: usize,
    /// Connections asked to terminate.
    pub terminated: usize,
}

/// Thread-safe map from connection ID to registered connection.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, RegisteredConnection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection after a successful handshake.
    ///
    /// Returns the liveness handle the owning task updates on pong.
    pub fn register(
        &self,
        id: ConnectionId,
        backend_kind: ConnectionKind,
        backend_session_id: impl Into<String>,
        control: mpsc::Sender<Control>,
    ) -> Result<Arc<Liveness>> {
        let liveness = Arc::new(Liveness::new());
        let entry = RegisteredConnection {
            id,
            backend_kind,
            backend_session_id: backend_session_id.into(),
            connected_at: Instant::now(),
            liveness: Arc::clone(&liveness),
            control,
        };

        let mut connections = self
            .connections
            .write()
            .map_err(|_| BridgeError::LockPoisoned)?;
        connections.insert(id, entry);
        Ok(liveness)
    }

    /// Remove a connection. Returns `None` if it was already removed.
    pub fn remove(&self, id: &ConnectionId) -> Result<Option<RegisteredConnection>> {
        let mut connections = self
            .connections
            .write()
            .map_err(|_| BridgeError::LockPoisoned)?;
        Ok(connections.remove(id))
    }

    /// Get a clone of the registered connection.
    pub fn get(&self, id: &ConnectionId) -> Result<Option<RegisteredConnection>> {
        let connections = self
            .connections
            .read()
            .map_err(|_| BridgeError::LockPoisoned)?;
        Ok(connections.get(id).cloned())
    }

    /// Check if a connection is registered.
    pub fn contains(&self, id: &ConnectionId) -> Result<bool> {
        let connections = self
            .connections
            .read()
            .map_err(|_| BridgeError::LockPoisoned)?;
        Ok(connections.contains_key(id))
    }

    /// Number of registered connections.
    pub fn count(&self) -> usize {
        self.connections.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Snapshot of every registered connection.
    pub fn list(&self) -> Result<Vec<RegisteredConnection>> {
        let connections = self
            .connections
            .read()
            .map_err(|_| BridgeError::LockPoisoned)?;
        Ok(connections.values().cloned().collect())
    }

    /// Connections currently bound to the given backend session.
    pub fn connections_for(&self, backend_session_id: &str) -> Result<Vec<ConnectionId>> {
        let connections = self
            .connections
            .read()
            .map_err(|_| BridgeError::LockPoisoned)?;
        Ok(connections
            .values()
            .filter(|c| c.backend_session_id == backend_session_id)
            .map(|c| c.id)
            .collect())
    }

    /// Ask every connection bound to `backend_session_id` to terminate.
    ///
    /// Returns the number of connections signalled.
    pub fn terminate_backend(&self, backend_session_id: &str) -> Result<usize> {
        let connections = self
            .connections
            .read()
            .map_err(|_| BridgeError::LockPoisoned)?;

        let mut signalled = 0;
        for conn in connections
            .values()
            .filter(|c| c.backend_session_id == backend_session_id)
        {
            if conn.control.try_send(Control::Terminate).is_ok() {
                signalled += 1;
            } else {
                debug!("{}: control channel full or closed", conn.id);
            }
        }
        Ok(signalled)
    }

    /// Ping live connections and terminate the ones that stopped answering.
    pub fn sweep(&self, liveness_timeout: Duration) -> SweepReport {
        let Ok(connections) = self.connections.read() else {
            warn!("connection registry lock poisoned; skipping sweep");
            return SweepReport::default();
        };

        let mut report = SweepReport::default();
        for conn in connections.values() {
            let idle = conn.liveness.idle();
            if idle > liveness_timeout {
                info!(
                    "{}: no pong for {}s, terminating",
                    conn.id,
                    idle.as_secs()
                );
                if conn.control.try_send(Control::Terminate).is_ok() {
                    report.terminated += 1;
                }
            } else if conn.control.try_send(Control::Ping).is_ok() {
                report.pinged += 1;
            }
        }
        report
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the runtime shuts down.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        liveness_timeout: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = self.sweep(liveness_timeout);
                debug!(
                    "liveness sweep: pinged {}, terminated {}",
                    report.pinged, report.terminated
                );
            }
        })
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(
        registry: &ConnectionRegistry,
        backend: &str,
    ) -> (ConnectionId, Arc<Liveness>, mpsc::Receiver<Control>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(4);
        let liveness = registry
            .register(id, ConnectionKind::Local, backend, tx)
            .unwrap();
        (id, liveness, rx)
    }

    #[test]
    fn test_register_and_remove() {
        let registry = ConnectionRegistry::new();
        let (id, _, _rx) = register(&registry, "term-1");

        assert!(registry.contains(&id).unwrap());
        assert_eq!(registry.count(), 1);
        assert_eq!(
            registry.get(&id).unwrap().unwrap().backend_session_id,
            "term-1"
        );

        assert!(registry.remove(&id).unwrap().is_some());
        assert!(registry.remove(&id).unwrap().is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_connections_for_backend() {
        let registry = ConnectionRegistry::new();
        let (a, _, _rx_a) = register(&registry, "shared");
        let (b, _, _rx_b) = register(&registry, "shared");
        let (_c, _, _rx_c) = register(&registry, "other");

        let ids = registry.connections_for("shared").unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a));
        assert!(ids.contains(&b));
    }

    #[test]
    fn test_terminate_backend_signals_only_matching() {
        let registry = ConnectionRegistry::new();
        let (_a, _, mut rx_a) = register(&registry, "doomed");
        let (_b, _, mut rx_b) = register(&registry, "keep");

        assert_eq!(registry.terminate_backend("doomed").unwrap(), 1);
        assert_eq!(rx_a.try_recv().unwrap(), Control::Terminate);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_sweep_pings_live_connections() {
        let registry = ConnectionRegistry::new();
        let (_id, _, mut rx) = register(&registry, "term-1");

        let report = registry.sweep(Duration::from_secs(60));
        assert_eq!(report, SweepReport { pinged: 1, terminated: 0 });
        assert_eq!(rx.try_recv().unwrap(), Control::Ping);
    }

    #[test]
    fn test_sweep_terminates_silent_connections() {
        let registry = ConnectionRegistry::new();
        let (_id, _, mut rx) = register(&registry, "term-1");

        std::thread::sleep(Duration::from_millis(20));
        let report = registry.sweep(Duration::from_millis(5));
        assert_eq!(report, SweepReport { pinged: 0, terminated: 1 });
        assert_eq!(rx.try_recv().unwrap(), Control::Terminate);
    }

    #[test]
    fn test_touch_keeps_connection_alive() {
        let registry = ConnectionRegistry::new();
        let (_id, liveness, mut rx) = register(&registry, "term-1");

        std::thread::sleep(Duration::from_millis(20));
        liveness.touch();
        let report = registry.sweep(Duration::from_millis(15));
        assert_eq!(report.pinged, 1);
        assert_eq!(rx.try_recv().unwrap(), Control::Ping);
    }

    #[test]
    fn test_concurrent_registration() {
        use std::thread;

        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = vec![];

        for i in 0..50 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                let (tx, _rx) = mpsc::channel(1);
                let id = ConnectionId::new();
                registry
                    .register(id, ConnectionKind::Local, format!("term-{i}"), tx)
                    .unwrap();
                id
            }));
        }

        let ids: Vec<ConnectionId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 50);
        assert_eq!(registry.count(), 50);
    }
}
