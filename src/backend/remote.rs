//! Remote shell backend: the system `ssh` client running inside a PTY.
//!
//! Password and passphrase prompts are answered through the PTY itself, so
//! no SSH implementation lives in this crate. The login is watched by
//! [`AuthProgress`] until the first post-authentication output arrives.

use std::io::Write;
use std::path::Path;

use portable_pty::CommandBuilder;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::BackendOptions;
use crate::api::types::RemoteInfo;
use crate::error::BackendError;
use crate::pty::{ByteStream, NativePty, PtyControl, PtySize};

const SSH_BINARY: &str = "ssh";

/// Generate an id for a remote backend.
pub fn generate_session_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("remote-{}", &uuid[..12])
}

/// The single credential a remote login uses.
#[derive(Clone, PartialEq, Eq)]
pub(crate) enum Credentials {
    Password(String),
    Key {
        key: String,
        passphrase: Option<String>,
    },
}

impl Credentials {
    /// Exactly one of password or private key must be present.
    pub(crate) fn from_info(info: &RemoteInfo) -> Result<Self, BackendError> {
        if info.host.trim().is_empty() || info.username.trim().is_empty() {
            return Err(BackendError::InvalidCredentials(
                "host and username are required".into(),
            ));
        }

        let non_empty = |v: &Option<String>| v.as_ref().filter(|s| !s.is_empty()).cloned();
        match (non_empty(&info.password), non_empty(&info.private_key)) {
            (Some(password), None) => Ok(Self::Password(password)),
            (None, Some(key)) => Ok(Self::Key {
                key,
                passphrase: non_empty(&info.passphrase),
            }),
            (Some(_), Some(_)) => Err(BackendError::InvalidCredentials(
                "provide either a password or a private key, not both".into(),
            )),
            (None, None) => Err(BackendError::InvalidCredentials(
                "a password or a private key is required".into(),
            )),
        }
    }
}

/// What to do after feeding login output to [`AuthProgress`].
#[derive(Debug)]
pub(crate) enum AuthStep {
    /// Need more output.
    Continue,
    /// Write this reply to the PTY.
    Respond(String),
    /// Logged in; the bytes seen since the last reply belong to the session.
    Established(Vec<u8>),
    Failed(BackendError),
}

/// Watches `ssh` output during login.
pub(crate) struct AuthProgress {
    credentials: Credentials,
    timeout_secs: u64,
    password_sent: bool,
    passphrase_sent: bool,
    pending: Vec<u8>,
}

impl AuthProgress {
    pub(crate) fn new(credentials: Credentials, timeout_secs: u64) -> Self {
        Self {
            credentials,
            timeout_secs,
            password_sent: false,
            passphrase_sent: false,
            pending: Vec::new(),
        }
    }

    pub(crate) fn feed(&mut self, chunk: &[u8]) -> AuthStep {
        self.pending.extend_from_slice(chunk);
        let text = String::from_utf8_lossy(&self.pending).to_lowercase();

        if let Some(err) = self.classify_failure(&text) {
            return AuthStep::Failed(err);
        }

        let (complete, partial) = match text.rfind('\n') {
            Some(pos) => (&text[..pos], &text[pos + 1..]),
            None => ("", text.as_str()),
        };
        let partial = partial.trim();

        if partial.ends_with("password:") {
            return self.answer_password();
        }
        if partial.contains("passphrase for key") && partial.ends_with(':') {
            return self.answer_passphrase();
        }

        let has_content = complete
            .lines()
            .map(str::trim)
            .any(|line| !line.is_empty() && !line.starts_with("warning:"));
        let partial_is_content = !partial.is_empty()
            && !partial.starts_with("warning:")
            && !partial.contains("password")
            && !partial.contains("passphrase");

        if has_content || partial_is_content {
            return AuthStep::Established(std::mem::take(&mut self.pending));
        }
        AuthStep::Continue
    }

    /// `ssh` exited before login completed.
    pub(crate) fn on_exit(&self) -> BackendError {
        let text = String::from_utf8_lossy(&self.pending).to_lowercase();
        self.classify_failure(&text).unwrap_or_else(|| {
            BackendError::Network("ssh exited before the session was established".into())
        })
    }

    fn classify_failure(&self, text: &str) -> Option<BackendError> {
        if text.contains("permission denied") || text.contains("too many authentication failures") {
            return Some(BackendError::Authentication(
                "the remote host rejected the credentials".into(),
            ));
        }
        if text.contains("connection timed out") || text.contains("operation timed out") {
            return Some(BackendError::Timeout(self.timeout_secs));
        }
        const NETWORK: [&str; 6] = [
            "could not resolve hostname",
            "connection refused",
            "no route to host",
            "network is unreachable",
            "host key verification failed",
            "connection closed by",
        ];
        NETWORK
            .iter()
            .find(|pattern| text.contains(*pattern))
            .map(|pattern| BackendError::Network((*pattern).to_string()))
    }

    fn answer_password(&mut self) -> AuthStep {
        match &self.credentials {
            Credentials::Password(password) if !self.password_sent => {
                self.password_sent = true;
                self.pending.clear();
                AuthStep::Respond(format!("{}\n", password))
            }
            Credentials::Password(_) => {
                AuthStep::Failed(BackendError::Authentication("password rejected".into()))
            }
            Credentials::Key { .. } => AuthStep::Failed(BackendError::Authentication(
                "the remote host asked for a password".into(),
            )),
        }
    }

    fn answer_passphrase(&mut self) -> AuthStep {
        match &self.credentials {
            Credentials::Key {
                passphrase: Some(passphrase),
                ..
            } if !self.passphrase_sent => {
                self.passphrase_sent = true;
                self.pending.clear();
                AuthStep::Respond(format!("{}\n", passphrase))
            }
            Credentials::Key {
                passphrase: Some(_),
                ..
            } => AuthStep::Failed(BackendError::Authentication("passphrase rejected".into())),
            _ => AuthStep::Failed(BackendError::Authentication(
                "the private key requires a passphrase".into(),
            )),
        }
    }
}

/// Build the `ssh` invocation for `info`.
pub(crate) fn ssh_command(
    info: &RemoteInfo,
    key_path: Option<&Path>,
    options: &BackendOptions,
) -> CommandBuilder {
    let mut cmd = CommandBuilder::new(SSH_BINARY);
    let port = info.port.to_string();
    let connect_timeout = format!("ConnectTimeout={}", options.remote_timeout.as_secs().max(1));

    cmd.args(["-t", "-p", port.as_str()]);
    cmd.args(["-o", "StrictHostKeyChecking=accept-new"]);
    cmd.args(["-o", connect_timeout.as_str()]);
    cmd.args(["-o", "NumberOfPasswordPrompts=1"]);
    cmd.args(["-o", "ServerAliveInterval=30"]);

    match key_path {
        Some(path) => {
            cmd.arg("-i");
            cmd.arg(path);
            cmd.args(["-o", "IdentitiesOnly=yes"]);
            cmd.args(["-o", "PreferredAuthentications=publickey"]);
        }
        None => {
            cmd.args(["-o", "PreferredAuthentications=password,keyboard-interactive"]);
            cmd.args(["-o", "PubkeyAuthentication=no"]);
        }
    }

    cmd.args(["-l", info.username.as_str(), "--", info.host.as_str()]);
    cmd.env("TERM", &options.term);
    cmd
}

fn write_key_file(key: &str) -> Result<NamedTempFile, BackendError> {
    let mut file = NamedTempFile::new()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(key.as_bytes())?;
    if !key.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(file)
}

/// Put `initial` back in front of the stream's output.
fn with_initial_output(stream: ByteStream, initial: Vec<u8>) -> ByteStream {
    if initial.is_empty() {
        return stream;
    }
    let ByteStream { mut output, input } = stream;
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        if tx.send(initial).await.is_err() {
            return;
        }
        while let Some(chunk) = output.recv().await {
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });
    ByteStream { output: rx, input }
}

/// A logged-in remote shell.
pub struct RemoteBackend {
    session_id: String,
    address: String,
    control: PtyControl,
    // Removed from disk when the backend goes away.
    _key_file: Option<NamedTempFile>,
}

impl RemoteBackend {
    /// Log in to `info` and return the backend with its byte stream.
    pub(crate) async fn connect(
        info: &RemoteInfo,
        options: &BackendOptions,
    ) -> Result<(Self, ByteStream), BackendError> {
        let credentials = Credentials::from_info(info)?;
        let key_file = match &credentials {
            Credentials::Key { key, .. } => Some(write_key_file(key)?),
            Credentials::Password(_) => None,
        };

        let cmd = ssh_command(info, key_file.as_ref().map(|f| f.path()), options);
        let handle = NativePty::new()
            .spawn(cmd, options.size)
            .map_err(|e| BackendError::Network(format!("cannot start ssh: {}", e)))?;
        debug!("ssh to {} started (pid {})", info.address(), handle.pid);

        let control = handle.control;
        let mut stream = ByteStream::from_pty(handle.reader, handle.writer);
        let timeout_secs = options.remote_timeout.as_secs();
        let mut auth = AuthProgress::new(credentials, timeout_secs);

        let login = async {
            loop {
                let Some(chunk) = stream.output.recv().await else {
                    return Err(auth.on_exit());
                };
                match auth.feed(&chunk) {
                    AuthStep::Continue => {}
                    AuthStep::Respond(reply) => {
                        if stream.input.send(reply.into_bytes()).await.is_err() {
                            return Err(BackendError::Network("ssh input closed".into()));
                        }
                    }
                    AuthStep::Established(initial) => return Ok(initial),
                    AuthStep::Failed(e) => return Err(e),
                }
            }
        };

        let initial = match tokio::time::timeout(options.remote_timeout, login).await {
            Ok(Ok(initial)) => initial,
            Ok(Err(e)) => {
                warn!("ssh to {} failed: {}", info.address(), e);
                kill_ssh(&control, &info.address());
                return Err(e);
            }
            Err(_) => {
                warn!("ssh to {} timed out", info.address());
                kill_ssh(&control, &info.address());
                return Err(BackendError::Timeout(timeout_secs));
            }
        };

        let backend = Self {
            session_id: generate_session_id(),
            address: info.address(),
            control,
            _key_file: key_file,
        };
        info!(
            "remote session {} established to {}@{}",
            backend.session_id,
            info.username,
            backend.address
        );
        Ok((backend, with_initial_output(stream, initial)))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn resize(&self, size: PtySize) -> crate::Result<()> {
        self.control.resize(size)
    }

    /// Close the remote shell.
    pub fn terminate(&self) {
        kill_ssh(&self.control, &self.address);
    }
}

fn kill_ssh(control: &PtyControl, address: &str) {
    if let Err(e) = control.kill() {
        warn!("failed to kill ssh client for {}: {}", address, e);
    }
}
