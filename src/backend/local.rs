//! Local PTY backend, tmux-backed when available.

use std::sync::Arc;

use portable_pty::CommandBuilder;
use tracing::{info, warn};

use super::multiplexer::{is_valid_session_name, Multiplexer};
use super::BackendOptions;
use crate::error::BackendError;
use crate::pty::{default_shell, ByteStream, NativePty, PtyControl, PtySize};

/// How a local attach request will be satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalPlan {
    /// Attach to a live multiplexer session.
    Attach(String),
    /// Create a multiplexer session with this name.
    Create(String),
    /// No multiplexer: run a bare shell under a fresh, undiscoverable id.
    BareShell(String),
}

impl LocalPlan {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Attach(id) | Self::Create(id) | Self::BareShell(id) => id,
        }
    }

    pub fn is_new(&self) -> bool {
        !matches!(self, Self::Attach(_))
    }
}

/// Generate a fresh local session name.
pub fn generate_session_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("session-{}", &uuid[..12])
}

/// Decide between attach, create and bare shell for a requested id.
pub async fn plan(mux: &dyn Multiplexer, requested: Option<&str>) -> LocalPlan {
    if !mux.is_available().await {
        return LocalPlan::BareShell(generate_session_id());
    }

    let requested = requested
        .map(str::trim)
        .filter(|id| is_valid_session_name(id))
        .map(String::from);

    match requested {
        Some(id) if mux.has_session(&id).await => LocalPlan::Attach(id),
        Some(id) => LocalPlan::Create(id),
        None => LocalPlan::Create(generate_session_id()),
    }
}

/// A local terminal: a tmux client attached to a named session, or a bare
/// shell.
pub struct LocalBackend {
    session_id: String,
    persistent: bool,
    control: PtyControl,
    mux: Arc<dyn Multiplexer>,
}

impl LocalBackend {
    /// Carry out `plan`, falling back to a bare shell if tmux cannot be
    /// started.
    pub(crate) fn start(
        mux: Arc<dyn Multiplexer>,
        plan: &LocalPlan,
        options: &BackendOptions,
    ) -> Result<(Self, ByteStream, bool), BackendError> {
        let pty = NativePty::new();
        let size = options.size;

        let mux_cmd = match plan {
            LocalPlan::Attach(id) => Some(mux.attach_command(id)),
            LocalPlan::Create(id) => Some(mux.create_command(id, size)),
            LocalPlan::BareShell(_) => None,
        };

        if let Some(cmd) = mux_cmd {
            match pty.spawn(with_term(cmd, options), size) {
                Ok(handle) => {
                    info!(
                        "{} session {} ({})",
                        mux.name(),
                        plan.session_id(),
                        if plan.is_new() { "created" } else { "attached" }
                    );
                    let stream = ByteStream::from_pty(handle.reader, handle.writer);
                    let backend = Self {
                        session_id: plan.session_id().to_string(),
                        persistent: true,
                        control: handle.control,
                        mux,
                    };
                    return Ok((backend, stream, plan.is_new()));
                }
                Err(e) => warn!(
                    "{} spawn failed for {}, falling back to shell: {}",
                    mux.name(),
                    plan.session_id(),
                    e
                ),
            }
        }

        let handle = pty
            .spawn(with_term(CommandBuilder::new(default_shell()), options), size)
            .map_err(|e| BackendError::Pty(e.to_string()))?;
        info!(
            "bare shell for {} (pid {}, not reattachable)",
            plan.session_id(),
            handle.pid
        );
        let stream = ByteStream::from_pty(handle.reader, handle.writer);
        let backend = Self {
            session_id: plan.session_id().to_string(),
            persistent: false,
            control: handle.control,
            mux,
        };
        Ok((backend, stream, true))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether the session survives the transport (multiplexer-backed).
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn resize(&self, size: PtySize) -> crate::Result<()> {
        self.control.resize(size)
    }

    /// Destroy the backend, including the multiplexer session.
    pub async fn terminate(&self) {
        if self.persistent {
            self.mux.kill_session(&self.session_id).await;
        }
        self.kill_client();
    }

    /// Drop the client side. A multiplexer session keeps running.
    pub async fn release(&self) {
        self.kill_client();
    }

    fn kill_client(&self) {
        if let Err(e) = self.control.kill() {
            warn!("failed to kill pty client for {}: {}", self.session_id, e);
        }
    }

    pub async fn current_directory(&self) -> Option<String> {
        if !self.persistent {
            return None;
        }
        self.mux.current_directory(&self.session_id).await
    }
}

fn with_term(mut cmd: CommandBuilder, options: &BackendOptions) -> CommandBuilder {
    cmd.env("TERM", &options.term);
    cmd.env("COLORTERM", "truecolor");
    cmd
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// In-memory multiplexer whose "sessions" are plain `/bin/sh` processes.
    #[derive(Default)]
    pub(crate) struct FakeMultiplexer {
        pub available: bool,
        pub sessions: Mutex<HashSet<String>>,
        pub directory: Mutex<Option<String>>,
    }

    impl FakeMultiplexer {
        pub(crate) fn with_sessions(names: &[&str]) -> Self {
            Self {
                available: true,
                sessions: Mutex::new(names.iter().map(|s| s.to_string()).collect()),
                directory: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Multiplexer for FakeMultiplexer {
        fn name(&self) -> &str {
            "fake"
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        async fn has_session(&self, session: &str) -> bool {
            self.sessions.lock().unwrap().contains(session)
        }

        async fn list_sessions(&self) -> Vec<String> {
            let mut names: Vec<String> = self.sessions.lock().unwrap().iter().cloned().collect();
            names.sort();
            names
        }

        async fn kill_session(&self, session: &str) -> bool {
            self.sessions.lock().unwrap().remove(session)
        }

        async fn current_directory(&self, _session: &str) -> Option<String> {
            self.directory.lock().unwrap().clone()
        }

        fn attach_command(&self, _session: &str) -> CommandBuilder {
            CommandBuilder::new("/bin/sh")
        }

        fn create_command(&self, session: &str, _size: PtySize) -> CommandBuilder {
            self.sessions.lock().unwrap().insert(session.to_string());
            CommandBuilder::new("/bin/sh")
        }
    }

    #[tokio::test]
    async fn test_plan_attaches_to_live_session() {
        let mux = FakeMultiplexer::with_sessions(&["tab-1"]);
        assert_eq!(
            plan(&mux, Some("tab-1")).await,
            LocalPlan::Attach("tab-1".into())
        );
    }

    #[tokio::test]
    async fn test_plan_creates_missing_session_with_requested_name() {
        let mux = FakeMultiplexer::with_sessions(&["tab-1"]);
        let planned = plan(&mux, Some("tab-2")).await;
        assert_eq!(planned, LocalPlan::Create("tab-2".into()));
        assert!(planned.is_new());
    }

    #[tokio::test]
    async fn test_plan_generates_id_when_none_requested() {
        let mux = FakeMultiplexer::with_sessions(&[]);
        match plan(&mux, None).await {
            LocalPlan::Create(id) => assert!(id.starts_with("session-")),
            other => panic!("unexpected plan: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plan_replaces_unusable_names() {
        let mux = FakeMultiplexer::with_sessions(&[]);
        match plan(&mux, Some("bad.name")).await {
            LocalPlan::Create(id) => assert_ne!(id, "bad.name"),
            other => panic!("unexpected plan: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plan_without_multiplexer_is_bare_shell() {
        let mux = FakeMultiplexer::default();
        let planned = plan(&mux, Some("tab-1")).await;
        assert!(matches!(planned, LocalPlan::BareShell(_)));
        assert_ne!(planned.session_id(), "tab-1");
        assert!(planned.is_new());
    }

    #[test]
    fn test_generated_ids_are_valid_and_distinct() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert!(is_valid_session_name(&a));
        assert_ne!(a, b);
    }
}
