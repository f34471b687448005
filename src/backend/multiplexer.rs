//! Terminal multiplexer capability (tmux).

use async_trait::async_trait;
use portable_pty::CommandBuilder;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::pty::PtySize;

/// Longest session name accepted from clients.
const MAX_SESSION_NAME: usize = 64;

/// Named, detachable terminal sessions on the local host.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Whether the multiplexer can be used on this host.
    async fn is_available(&self) -> bool;

    /// Whether a live session with exactly this name exists.
    async fn has_session(&self, session: &str) -> bool;

    /// Names of all live sessions.
    async fn list_sessions(&self) -> Vec<String>;

    /// Destroy a session. Returns `true` if one was killed.
    async fn kill_session(&self, session: &str) -> bool;

    /// Working directory of the session's active pane.
    async fn current_directory(&self, session: &str) -> Option<String>;

    /// Command that attaches a new client to an existing session.
    fn attach_command(&self, session: &str) -> CommandBuilder;

    /// Command that creates (or joins) a session with the given name.
    fn create_command(&self, session: &str, size: PtySize) -> CommandBuilder;
}

/// Check that a name can be used as a multiplexer session name.
///
/// tmux treats `.` and `:` as target separators.
pub fn is_valid_session_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_SESSION_NAME
        && !name
            .chars()
            .any(|c| c == '.' || c == ':' || c.is_whitespace() || c.is_control())
}

/// Exact-match tmux target. A bare name would also match by prefix.
fn exact_target(session: &str) -> String {
    format!("={}", session)
}

/// tmux-backed multiplexer driven through the `tmux` binary.
#[derive(Debug, Clone)]
pub struct TmuxMultiplexer {
    binary: String,
}

impl TmuxMultiplexer {
    pub fn new() -> Self {
        Self {
            binary: "tmux".to_string(),
        }
    }

    /// Use a specific tmux binary.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run tmux and return stdout if it exited successfully.
    async fn run(&self, args: &[&str]) -> Option<String> {
        trace!("{} {:?}", self.binary, args);
        let output = Command::new(&self.binary).args(args).output().await.ok()?;
        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            debug!(
                "{} {:?} failed: {}",
                self.binary,
                args,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            None
        }
    }
}

impl Default for TmuxMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Multiplexer for TmuxMultiplexer {
    fn name(&self) -> &str {
        "tmux"
    }

    async fn is_available(&self) -> bool {
        self.run(&["-V"]).await.is_some()
    }

    async fn has_session(&self, session: &str) -> bool {
        if !is_valid_session_name(session) {
            return false;
        }
        let target = exact_target(session);
        self.run(&["has-session", "-t", &target]).await.is_some()
    }

    async fn list_sessions(&self) -> Vec<String> {
        self.run(&["list-sessions", "-F", "#{session_name}"])
            .await
            .map(|out| {
                out.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn kill_session(&self, session: &str) -> bool {
        if !is_valid_session_name(session) {
            return false;
        }
        let target = exact_target(session);
        self.run(&["kill-session", "-t", &target]).await.is_some()
    }

    async fn current_directory(&self, session: &str) -> Option<String> {
        if !is_valid_session_name(session) {
            return None;
        }
        let target = exact_target(session);
        self.run(&["display-message", "-p", "-t", &target, "#{pane_current_path}"])
            .await
            .map(|out| out.trim().to_string())
            .filter(|dir| !dir.is_empty())
    }

    fn attach_command(&self, session: &str) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.binary);
        let target = exact_target(session);
        cmd.args(["attach-session", "-t", target.as_str()]);
        cmd
    }

    fn create_command(&self, session: &str, size: PtySize) -> CommandBuilder {
        let size = size.clamped();
        let mut cmd = CommandBuilder::new(&self.binary);
        // -A joins the session instead of failing if it appeared meanwhile
        let cols = size.cols.to_string();
        let rows = size.rows.to_string();
        cmd.args([
            "new-session",
            "-A",
            "-s",
            session,
            "-x",
            cols.as_str(),
            "-y",
            rows.as_str(),
        ]);
        cmd
    }
}

/// Stand-in used when multiplexing is disabled; always unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMultiplexer;

#[async_trait]
impl Multiplexer for NoMultiplexer {
    fn name(&self) -> &str {
        "none"
    }

    async fn is_available(&self) -> bool {
        false
    }

    async fn has_session(&self, _session: &str) -> bool {
        false
    }

    async fn list_sessions(&self) -> Vec<String> {
        Vec::new()
    }

    async fn kill_session(&self, _session: &str) -> bool {
        false
    }

    async fn current_directory(&self, _session: &str) -> Option<String> {
        None
    }

    fn attach_command(&self, _session: &str) -> CommandBuilder {
        CommandBuilder::new(crate::pty::default_shell())
    }

    fn create_command(&self, _session: &str, _size: PtySize) -> CommandBuilder {
        CommandBuilder::new(crate::pty::default_shell())
    }
}
