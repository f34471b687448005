//! Client reconnection controller.
//!
//! [`ReconnectController`] is the pure state machine: it is fed transport
//! events and answers with the next [`Action`]. [`spawn_client`] wraps it in
//! a task that owns the transport, the retry timer and the resize debouncer,
//! and talks to the UI through a [`ClientHandle`] and a stream of
//! [`ClientEvent`]s.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, trace, warn};

use super::record::SessionRecord;
use super::resize::ResizeDebouncer;
use super::transport::{Connector, Transport};
use super::ClientConfig;
use crate::api::types::{ClientMessage, ConnectionKind, RemoteInfo, ServerMessage};
use crate::error::BridgeError;

/// Server error codes that retrying cannot fix.
const NON_RETRIABLE_CODES: [&str; 2] = ["INVALID_CREDENTIALS", "AUTH_FAILED"];

/// Connection status shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What the driver should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open a transport now.
    Connect,
    /// Wait, then report [`ReconnectController::on_reconnect_timer`].
    Retry(Duration),
    /// Give up with a user-visible reason.
    Fail(String),
    /// Nothing more to do.
    Stop,
}

/// The session a client wants to be bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub backend_session_id: Option<String>,
    pub connection_kind: ConnectionKind,
    /// Includes credentials; never persisted.
    pub remote_info: Option<RemoteInfo>,
}

impl SessionTarget {
    pub fn local(backend_session_id: Option<String>) -> Self {
        Self {
            backend_session_id,
            connection_kind: ConnectionKind::Local,
            remote_info: None,
        }
    }

    pub fn remote(backend_session_id: Option<String>, info: RemoteInfo) -> Self {
        Self {
            backend_session_id,
            connection_kind: ConnectionKind::Remote,
            remote_info: Some(info),
        }
    }

    /// Target for a stored record. Remote records need the credentials
    /// supplied again since the store never holds them.
    pub fn from_record(record: &SessionRecord, credentials: Option<RemoteInfo>) -> Self {
        Self {
            backend_session_id: Some(record.backend_session_id.clone()),
            connection_kind: record.connection_kind,
            remote_info: match record.connection_kind {
                ConnectionKind::Remote => credentials.or_else(|| record.remote_info.clone()),
                ConnectionKind::Local => None,
            },
        }
    }

    pub fn init_message(&self) -> ClientMessage {
        ClientMessage::Init {
            backend_session_id: self.backend_session_id.clone(),
            connection_kind: self.connection_kind,
            remote_info: self.remote_info.clone(),
        }
    }
}

/// Bounded, fixed-delay reconnection state machine.
#[derive(Debug, Clone)]
pub struct ReconnectController {
    status: ConnectionStatus,
    attempts: u32,
    max_attempts: u32,
    delay: Duration,
    intentional_close: bool,
    target: SessionTarget,
}

impl ReconnectController {
    pub fn new(target: SessionTarget, max_attempts: u32, delay: Duration) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempts: 0,
            max_attempts,
            delay,
            intentional_close: false,
            target,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Consecutive unexpected losses since the last successful handshake.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    pub fn start(&mut self) -> Action {
        self.intentional_close = false;
        self.status = ConnectionStatus::Connecting;
        Action::Connect
    }

    /// Transport opened. Returns the handshake to send.
    pub fn on_open(&mut self) -> ClientMessage {
        self.status = ConnectionStatus::Connected;
        self.target.init_message()
    }

    /// Handshake answered. Returns the previous identity if the server
    /// resolved a different one.
    pub fn on_session_info(&mut self, resolved_id: &str) -> Option<Option<String>> {
        self.attempts = 0;
        if self.target.backend_session_id.as_deref() == Some(resolved_id) {
            return None;
        }
        let previous = self.target.backend_session_id.replace(resolved_id.to_string());
        Some(previous)
    }

    /// The transport closed or could not be opened.
    pub fn on_loss(&mut self) -> Action {
        if self.intentional_close {
            self.status = ConnectionStatus::Disconnected;
            return Action::Stop;
        }
        if self.status == ConnectionStatus::Failed {
            return Action::Stop;
        }

        self.attempts += 1;
        if self.attempts < self.max_attempts {
            self.status = ConnectionStatus::Reconnecting;
            Action::Retry(self.delay)
        } else {
            self.status = ConnectionStatus::Failed;
            Action::Fail(format!(
                "connection lost after {} attempts",
                self.attempts
            ))
        }
    }

    pub fn on_reconnect_timer(&mut self) -> Action {
        if self.status != ConnectionStatus::Reconnecting || self.intentional_close {
            return Action::Stop;
        }
        self.status = ConnectionStatus::Connecting;
        Action::Connect
    }

    /// An `error` message arrived. Credential problems end the session.
    pub fn on_server_error(&mut self, code: &str, message: &str) -> Option<Action> {
        if !NON_RETRIABLE_CODES.contains(&code) {
            return None;
        }
        self.status = ConnectionStatus::Failed;
        Some(Action::Fail(format!("{}: {}", code, message)))
    }

    /// Mark the coming closure as requested by the user.
    pub fn close_intentionally(&mut self) {
        self.intentional_close = true;
        if self.status != ConnectionStatus::Failed {
            self.status = ConnectionStatus::Disconnected;
        }
    }
}

/// Events delivered to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Status(ConnectionStatus),
    Output(String),
    SessionInfo {
        resolved_id: String,
        is_new: bool,
        backend_available: bool,
        connection_kind: ConnectionKind,
    },
    /// The backend's working directory changed.
    Directory(String),
    /// The server bound this tab to a different identity; the record store
    /// should adopt `resolved_id` as the record's `backendSessionId`.
    IdentityChanged {
        previous: Option<String>,
        resolved_id: String,
    },
    SessionsList(Vec<String>),
    /// Terminal geometry settled after a resize burst.
    Fit { cols: u16, rows: u16 },
    /// Server-reported error.
    ServerError { code: String, message: String },
    /// The controller gave up.
    Failed(String),
}

#[derive(Debug)]
enum ClientCommand {
    Input(String),
    Resize { cols: u16, rows: u16 },
    ListSessions,
}

/// UI-facing handle to a running client task.
pub struct ClientHandle {
    commands: mpsc::Sender<ClientCommand>,
    close: watch::Sender<Option<bool>>,
    status: watch::Receiver<ConnectionStatus>,
    directory: watch::Receiver<Option<String>>,
    task: JoinHandle<()>,
}

impl ClientHandle {
    async fn command(&self, command: ClientCommand) -> crate::Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }

    pub async fn send_input(&self, data: impl Into<String>) -> crate::Result<()> {
        self.command(ClientCommand::Input(data.into())).await
    }

    /// Request a geometry change; debounced before it reaches the server.
    pub async fn resize(&self, cols: u16, rows: u16) -> crate::Result<()> {
        self.command(ClientCommand::Resize { cols, rows }).await
    }

    pub async fn list_sessions(&self) -> crate::Result<()> {
        self.command(ClientCommand::ListSessions).await
    }

    /// Close the tab. With `destroy`, the server is asked to kill the
    /// backend too. Waits for the client task to finish, even when nobody
    /// is draining the event receiver.
    pub async fn close(self, destroy: bool) {
        self.close.send_replace(Some(destroy));
        if let Err(e) = self.task.await {
            warn!("client task ended abnormally: {}", e);
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch status changes.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Last directory reported by the server, if any.
    pub fn last_directory(&self) -> Option<String> {
        self.directory.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start a client task for `target`.
pub fn spawn_client(
    connector: Arc<dyn Connector>,
    target: SessionTarget,
    config: ClientConfig,
) -> (ClientHandle, mpsc::Receiver<ClientEvent>) {
    let (command_tx, command_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(256);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
    let (directory_tx, directory_rx) = watch::channel(None);
    let (close_tx, close_rx) = watch::channel(None);

    let driver = Driver {
        connector,
        controller: ReconnectController::new(
            target,
            config.max_reconnect_attempts,
            config.reconnect_delay,
        ),
        connect_timeout: config.connect_timeout,
        resize: ResizeDebouncer::new(config.resize_debounce),
        commands: command_rx,
        close: close_rx,
        events: event_tx,
        status: status_tx,
        directory: directory_tx,
    };
    let task = tokio::spawn(driver.run());

    let handle = ClientHandle {
        commands: command_tx,
        close: close_tx,
        status: status_rx,
        directory: directory_rx,
        task,
    };
    (handle, event_rx)
}

/// Resolves with the `destroy` flag once a close was requested.
async fn close_requested(close: &mut watch::Receiver<Option<bool>>) -> bool {
    let destroy = match close.wait_for(Option::is_some).await {
        Ok(value) => Some((*value).unwrap_or(false)),
        Err(_) => None,
    };
    match destroy {
        Some(destroy) => destroy,
        // Handle dropped without closing; the command channel reports that.
        None => std::future::pending().await,
    }
}

struct Driver {
    connector: Arc<dyn Connector>,
    controller: ReconnectController,
    connect_timeout: Duration,
    resize: ResizeDebouncer,
    commands: mpsc::Receiver<ClientCommand>,
    /// Set once by [`ClientHandle::close`]; the value is `destroy`.
    close: watch::Receiver<Option<bool>>,
    events: mpsc::Sender<ClientEvent>,
    status: watch::Sender<ConnectionStatus>,
    directory: watch::Sender<Option<String>>,
}

impl Driver {
    async fn run(mut self) {
        let mut action = self.controller.start();
        self.publish_status().await;

        loop {
            action = match action {
                Action::Connect => self.connect_and_stream().await,
                Action::Retry(delay) => self.wait_for_retry(delay).await,
                Action::Fail(reason) => {
                    warn!("giving up on session: {}", reason);
                    self.publish_status().await;
                    self.emit(ClientEvent::Failed(reason)).await;
                    break;
                }
                Action::Stop => break,
            };
        }
        self.publish_status().await;
        debug!("client task finished");
    }

    async fn emit(&self, event: ClientEvent) {
        let mut close = self.close.clone();
        tokio::select! {
            biased;
            // A dropped receiver just means nobody is listening.
            _ = self.events.send(event) => {}
            _ = close_requested(&mut close) => trace!("closing, event dropped"),
        }
    }

    async fn publish_status(&self) {
        let status = self.controller.status();
        if self.status.send_replace(status) != status {
            self.emit(ClientEvent::Status(status)).await;
        }
    }

    async fn lost(&mut self) -> Action {
        let action = self.controller.on_loss();
        if let Action::Retry(delay) = &action {
            info!(
                "connection lost, retry {} in {:?}",
                self.controller.attempts(),
                delay
            );
        }
        self.publish_status().await;
        action
    }

    async fn connect_and_stream(&mut self) -> Action {
        self.publish_status().await;
        let connect = tokio::select! {
            biased;
            _ = close_requested(&mut self.close) => {
                self.controller.close_intentionally();
                return Action::Stop;
            }
            connect = timeout(self.connect_timeout, self.connector.connect()) => connect,
        };
        let mut transport = match connect {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                warn!("connect failed: {}", e);
                return self.lost().await;
            }
            Err(_) => {
                warn!("connect timed out after {:?}", self.connect_timeout);
                return self.lost().await;
            }
        };

        let init = self.controller.on_open();
        self.publish_status().await;
        if let Err(e) = transport.send(&init).await {
            warn!("failed to send handshake: {}", e);
            transport.close().await;
            return self.lost().await;
        }
        if let Some((cols, rows)) = self.resize.current() {
            if let Err(e) = transport.send(&ClientMessage::Resize { cols, rows }).await {
                debug!("failed to restore size: {}", e);
            }
        }

        let action = self.stream(transport.as_mut()).await;
        transport.close().await;
        match action {
            Some(action) => action,
            None => self.lost().await,
        }
    }

    /// Returns `None` on unexpected transport loss.
    async fn stream(&mut self, transport: &mut dyn Transport) -> Option<Action> {
        loop {
            let deadline = self.resize.deadline();
            tokio::select! {
                biased;
                destroy = close_requested(&mut self.close) => {
                    self.controller.close_intentionally();
                    let id = self.controller.target().backend_session_id.clone();
                    if let Some(id) = id.filter(|_| destroy) {
                        let close = ClientMessage::CloseSession { backend_session_id: id };
                        if let Err(e) = transport.send(&close).await {
                            debug!("failed to send close_session: {}", e);
                        }
                    }
                    return Some(Action::Stop);
                }
                message = transport.recv() => {
                    let message = message?;
                    if let Some(action) = self.on_server_message(message).await {
                        return Some(action);
                    }
                }
                command = self.commands.recv() => {
                    let message = match command {
                        Some(ClientCommand::Input(data)) => ClientMessage::Input { data },
                        Some(ClientCommand::Resize { cols, rows }) => {
                            self.resize.request(cols, rows, Instant::now());
                            continue;
                        }
                        Some(ClientCommand::ListSessions) => ClientMessage::ListSessions,
                        None => {
                            self.controller.close_intentionally();
                            return Some(Action::Stop);
                        }
                    };
                    if transport.send(&message).await.is_err() {
                        return None;
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some((cols, rows)) = self.resize.take_ready(Instant::now()) {
                        self.emit(ClientEvent::Fit { cols, rows }).await;
                        if transport.send(&ClientMessage::Resize { cols, rows }).await.is_err() {
                            return None;
                        }
                    }
                }
            }
        }
    }

    async fn on_server_message(&mut self, message: ServerMessage) -> Option<Action> {
        match message {
            ServerMessage::SessionInfo {
                resolved_id,
                is_new,
                backend_available,
                connection_kind,
            } => {
                if let Some(previous) = self.controller.on_session_info(&resolved_id) {
                    info!("session identity is now {}", resolved_id);
                    self.emit(ClientEvent::IdentityChanged {
                        previous,
                        resolved_id: resolved_id.clone(),
                    })
                    .await;
                }
                self.emit(ClientEvent::SessionInfo {
                    resolved_id,
                    is_new,
                    backend_available,
                    connection_kind,
                })
                .await;
            }
            ServerMessage::Output { data } => self.emit(ClientEvent::Output(data)).await,
            ServerMessage::Error { code, message } => {
                warn!("server error {}: {}", code, message);
                let action = self.controller.on_server_error(&code, &message);
                self.emit(ClientEvent::ServerError { code, message }).await;
                if action.is_some() {
                    return action;
                }
            }
            ServerMessage::CurrentDirectory { directory } => {
                self.directory.send_replace(Some(directory.clone()));
                self.emit(ClientEvent::Directory(directory)).await;
            }
            ServerMessage::SessionsList { sessions } => {
                self.emit(ClientEvent::SessionsList(sessions)).await
            }
        }
        None
    }

    async fn wait_for_retry(&mut self, delay: Duration) -> Action {
        let wake = Instant::now() + delay;
        loop {
            tokio::select! {
                biased;
                _ = close_requested(&mut self.close) => {
                    self.controller.close_intentionally();
                    return Action::Stop;
                }
                _ = sleep_until(wake) => {
                    let action = self.controller.on_reconnect_timer();
                    self.publish_status().await;
                    return action;
                }
                command = self.commands.recv() => match command {
                    Some(ClientCommand::Resize { cols, rows }) => {
                        self.resize.request(cols, rows, Instant::now());
                    }
                    None => {
                        self.controller.close_intentionally();
                        return Action::Stop;
                    }
                    Some(other) => debug!("dropping {:?} while disconnected", other),
                },
            }
        }
    }
}
