//! WebSocket bridge between a browser terminal and a backend.
//!
//! Each transport runs one task that walks the connection state machine:
//! wait for `init`, attach, then relay until either side goes away.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::handlers::AppState;
use super::types::{ClientMessage, ServerMessage};
use crate::backend::{AttachRequest, Attached, Backend};
use crate::error::BridgeError;
use crate::pty::ByteStream;
use crate::session::{ConnectionId, ConnectionState, Control, DirectoryTracker, Liveness};

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Timing knobs for bridge connections.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// How long to wait for `init` before assuming a new local session.
    pub handshake_timeout: Duration,
    /// Working-directory poll period for multiplexer sessions.
    pub directory_poll_interval: Duration,
    /// Ping period of the liveness sweeper.
    pub ping_interval: Duration,
    /// Silence after which a transport is terminated.
    pub liveness_timeout: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            directory_poll_interval: Duration::from_millis(2000),
            ping_interval: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(60),
        }
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// What the streaming loop should do after a client frame.
enum Flow {
    Continue,
    Close,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = ConnectionId::new();
    let mut phase = ConnectionState::default();
    let (mut sink, mut stream) = socket.split();
    debug!("{}: transport open", id);

    let Some(request) = await_handshake(id, &mut stream, state.settings.handshake_timeout).await
    else {
        advance(id, &mut phase, ConnectionState::Closed);
        debug!("{}: closed before handshake", id);
        return;
    };
    advance(id, &mut phase, ConnectionState::Attaching);

    let attached = match state.adapter.attach_or_create(request).await {
        Ok(attached) => attached,
        Err(e) => {
            warn!("{}: attach failed: {}", id, e);
            let _ = send(&mut sink, &ServerMessage::error(e.code(), e.to_string())).await;
            let _ = sink.send(Message::Close(None)).await;
            advance(id, &mut phase, ConnectionState::Closed);
            return;
        }
    };

    let Attached {
        resolved_id,
        is_new,
        backend_available,
        backend,
        stream: bytes,
    } = attached;

    let (control_tx, control_rx) = mpsc::channel(8);
    let liveness = match state
        .registry
        .register(id, backend.kind(), &resolved_id, control_tx)
    {
        Ok(liveness) => liveness,
        Err(e) => {
            warn!("{}: registration failed: {}", id, e);
            backend.release().await;
            advance(id, &mut phase, ConnectionState::Closed);
            return;
        }
    };

    info!(
        "{}: bound to {} session {} (new: {}, reattachable: {})",
        id,
        backend.kind(),
        resolved_id,
        is_new,
        backend_available
    );

    let info = ServerMessage::SessionInfo {
        resolved_id: resolved_id.clone(),
        is_new,
        backend_available,
        connection_kind: backend.kind(),
    };
    if send(&mut sink, &info).await.is_ok() {
        advance(id, &mut phase, ConnectionState::Streaming);
        let mut conn = Connection {
            id,
            state: &state,
            backend: &backend,
            bytes,
            sink,
            liveness,
        };
        conn.stream(stream, control_rx).await;
        let _ = conn.sink.send(Message::Close(None)).await;
    }

    advance(id, &mut phase, ConnectionState::Closed);
    if let Err(e) = state.registry.remove(&id) {
        warn!("{}: failed to unregister: {}", id, e);
    }
    backend.release().await;
    info!("{}: closed ({})", id, resolved_id);
}

/// Wait for `init`. Returns `None` if the transport closed first.
async fn await_handshake(
    id: ConnectionId,
    stream: &mut WsStream,
    timeout: Duration,
) -> Option<AttachRequest> {
    let deadline = Instant::now() + timeout;

    loop {
        let frame = match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(frame) => frame,
            Err(_) => {
                info!("{}: no handshake within {:?}, assuming new local session", id, timeout);
                return Some(AttachRequest::local(None));
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => match ClientMessage::parse(text.as_str()) {
                Ok(ClientMessage::Init {
                    backend_session_id,
                    connection_kind,
                    remote_info,
                }) => {
                    debug!("{}: init ({})", id, connection_kind);
                    return Some(AttachRequest {
                        kind: connection_kind,
                        backend_session_id,
                        remote_info,
                    });
                }
                Ok(other) => debug!("{}: ignoring {:?} before handshake", id, other),
                Err(e) => warn!("{}: malformed frame before handshake: {}", id, e),
            },
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Err(e)) => {
                debug!("{}: transport error before handshake: {}", id, e);
                return None;
            }
            Some(Ok(_)) => {}
        }
    }
}

/// A streaming connection bound to its backend.
struct Connection<'a> {
    id: ConnectionId,
    state: &'a AppState,
    backend: &'a Backend,
    bytes: ByteStream,
    sink: WsSink,
    liveness: std::sync::Arc<Liveness>,
}

impl Connection<'_> {
    async fn stream(&mut self, mut client: WsStream, mut control: mpsc::Receiver<Control>) {
        let tracks_directory = self.backend.tracks_directory();
        let mut tracker = DirectoryTracker::new();
        let mut directory_poll = tokio::time::interval(self.state.settings.directory_poll_interval);
        directory_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut carry = Vec::new();

        loop {
            tokio::select! {
                chunk = self.bytes.output.recv() => {
                    let Some(chunk) = chunk else {
                        info!("{}: backend exited", self.id);
                        break;
                    };
                    let data = decode_output(&mut carry, chunk);
                    if data.is_empty() {
                        continue;
                    }
                    if send(&mut self.sink, &ServerMessage::Output { data }).await.is_err() {
                        break;
                    }
                }
                frame = client.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.liveness.touch();
                            if let Flow::Close = self.on_client_text(text.as_str()).await {
                                break;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => self.liveness.touch(),
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("{}: client closed transport", self.id);
                            break;
                        }
                        Some(Err(e)) => {
                            debug!("{}: transport error: {}", self.id, e);
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
                _ = directory_poll.tick(), if tracks_directory => {
                    let Some(raw) = self.backend.current_directory().await else {
                        continue;
                    };
                    if let Some(dir) = tracker.observe(&raw) {
                        let msg = ServerMessage::CurrentDirectory {
                            directory: dir.display().to_string(),
                        };
                        if send(&mut self.sink, &msg).await.is_err() {
                            break;
                        }
                    }
                }
                ctrl = control.recv() => match ctrl {
                    Some(Control::Ping) => {
                        trace!("{}: ping", self.id);
                        if self.sink.send(Message::Ping(Default::default())).await.is_err() {
                            break;
                        }
                    }
                    Some(Control::Terminate) | None => {
                        info!("{}: terminated", self.id);
                        break;
                    }
                },
            }
        }
    }

    async fn on_client_text(&mut self, text: &str) -> Flow {
        let msg = match ClientMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("{}: ignoring malformed frame: {}", self.id, e);
                return Flow::Continue;
            }
        };

        match msg {
            ClientMessage::Input { data } => {
                if self.bytes.input.send(data.into_bytes()).await.is_err() {
                    debug!("{}: backend input closed", self.id);
                    return Flow::Close;
                }
            }
            ClientMessage::Resize { cols, rows } => {
                debug!("{}: resize {}x{}", self.id, cols, rows);
                if let Err(e) = self.backend.resize(cols, rows) {
                    warn!("{}: resize failed: {}", self.id, e);
                }
            }
            ClientMessage::CloseSession { backend_session_id } => {
                info!("{}: close_session {}", self.id, backend_session_id);
                self.state.adapter.destroy_session(&backend_session_id).await;
                match self.state.registry.terminate_backend(&backend_session_id) {
                    Ok(n) => debug!("{}: signalled {} connection(s)", self.id, n),
                    Err(e) => warn!("{}: {}", self.id, e),
                }
            }
            ClientMessage::ListSessions => {
                let sessions = self.state.adapter.list_sessions().await;
                if send(&mut self.sink, &ServerMessage::SessionsList { sessions })
                    .await
                    .is_err()
                {
                    return Flow::Close;
                }
            }
            ClientMessage::Init { .. } => {
                debug!("{}: ignoring repeated init", self.id);
            }
        }
        Flow::Continue
    }
}

fn advance(id: ConnectionId, phase: &mut ConnectionState, next: ConnectionState) {
    if let Err(e) = phase.transition_to(next) {
        warn!("{}: {}", id, e);
    }
}

async fn send(sink: &mut WsSink, msg: &ServerMessage) -> crate::Result<()> {
    let json = msg.to_json()?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| BridgeError::Transport(e.to_string()))
}

/// Decode backend bytes, holding back a trailing partial UTF-8 sequence
/// until the next chunk completes it.
fn decode_output(carry: &mut Vec<u8>, chunk: Vec<u8>) -> String {
    carry.extend_from_slice(&chunk);
    match std::str::from_utf8(carry) {
        Ok(text) => {
            let text = text.to_string();
            carry.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let tail = carry.split_off(e.valid_up_to());
            let text = String::from_utf8_lossy(carry).into_owned();
            *carry = tail;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(carry).into_owned();
            carry.clear();
            text
        }
    }
}
