//! One WebSocket attachment: a writer task draining the connection's
//! outbound queue, and a reader loop applying inbound events.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use vocrypt_core::{ConnectionId, InboundEvent, OutboundEvent, SessionId};
use vocrypt_engine::{Membership, Outbox, RelayError, SessionRelay};

use crate::protocol;
use crate::routes::ApiError;
use crate::server::AppState;

/// `GET /ws`: join happens through `join_session` events.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.limits.max_message_size)
        .on_upgrade(move |socket| handle_ws_connection(socket, state, None))
}

/// `GET /api/sessions/{id}/ws`: joins `{id}` as soon as the socket opens.
pub async fn session_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let session_id = SessionId::from_raw(id);
    state.relay.session(&session_id).await?;
    Ok(ws
        .max_message_size(state.limits.max_message_size)
        .on_upgrade(move |socket| handle_ws_connection(socket, state, Some(session_id)))
        .into_response())
}

/// Per-connection membership state.
struct ConnectionContext {
    relay: Arc<SessionRelay>,
    connection_id: ConnectionId,
    outbox: Outbox,
    membership: Option<Membership>,
    left: bool,
}

impl ConnectionContext {
    fn new(relay: Arc<SessionRelay>, outbox: Outbox) -> Self {
        Self {
            relay,
            connection_id: ConnectionId::new(),
            outbox,
            membership: None,
            left: false,
        }
    }

    /// Whether the hub still has this connection in `session_id`. A held
    /// membership the hub no longer honours (the session was closed or the
    /// connection evicted) is discarded.
    fn joined(&mut self, session_id: &SessionId) -> bool {
        let live = self.relay.session_of(&self.connection_id);
        if self
            .membership
            .as_ref()
            .is_some_and(|m| live.as_ref() != Some(m.session_id()))
        {
            self.membership = None;
        }
        self.membership.is_some() && live.as_ref() == Some(session_id)
    }

    async fn handle(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::JoinSession { session_id } => self.join(session_id).await,
            InboundEvent::LeaveSession { session_id } => self.leave(&session_id),
            InboundEvent::SendAudioSignal {
                session_id,
                payload,
            } => self.relay_audio(&session_id, payload),
        }
    }

    async fn join(&mut self, session_id: SessionId) {
        if self.joined(&session_id) {
            return;
        }
        if self.left {
            self.connection_id = ConnectionId::new();
            self.left = false;
        }
        match self
            .relay
            .join(&session_id, &self.connection_id, self.outbox.clone())
            .await
        {
            // The previous membership, if any, was already moved by the hub.
            Ok(membership) => self.membership = Some(membership),
            Err(e) => self.reject(&e),
        }
    }

    fn leave(&mut self, session_id: &SessionId) {
        if !self.joined(session_id) {
            self.not_joined(session_id);
            return;
        }
        if let Some(membership) = self.membership.take() {
            membership.revoke();
        }
        self.left = true;
    }

    fn relay_audio(&mut self, session_id: &SessionId, payload: String) {
        if !self.joined(session_id) {
            self.not_joined(session_id);
            return;
        }
        if let Err(e) = self
            .relay
            .relay_audio(session_id, &self.connection_id, payload)
        {
            self.reject(&e);
        }
    }

    fn reject(&self, e: &RelayError) {
        debug!(connection_id = %self.connection_id, code = e.error_kind(), error = %e, "inbound event rejected");
        self.send_error(e.error_kind(), e.to_string());
    }

    fn not_joined(&self, session_id: &SessionId) {
        self.send_error("not_joined", format!("not joined to session {session_id}"));
    }

    fn send_error(&self, code: &str, message: String) {
        if !self.outbox.try_send(OutboundEvent::error(code, message)) {
            trace!(connection_id = %self.connection_id, "error event dropped, queue full");
        }
    }
}

/// Drive one WebSocket until the client goes away, the hub evicts it, the
/// heartbeat lapses, or the server shuts down. Membership is released when
/// this returns.
pub async fn handle_ws_connection(
    socket: WebSocket,
    state: AppState,
    auto_join: Option<SessionId>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbox, mut rx) = state.relay.open_channel();
    let evicted = outbox.closed().clone();
    let done = CancellationToken::new();
    let last_pong = Arc::new(Mutex::new(Instant::now()));

    let mut ctx = ConnectionContext::new(Arc::clone(&state.relay), outbox);
    let connection_id = ctx.connection_id.clone();
    info!(connection_id = %connection_id, "WebSocket client connected");

    // Writer task: drain the outbound queue, ping, and watch for a lapsed heartbeat.
    let limits = Arc::clone(&state.limits);
    let writer_done = done.clone();
    let writer_pong = Arc::clone(&last_pong);
    let writer_cid = connection_id.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(limits.heartbeat_interval);
        ping_interval.tick().await;
        // Oldest ping the client has not answered yet.
        let mut awaiting_pong: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = writer_done.cancelled() => break,
                _ = evicted.cancelled() => {
                    debug!(connection_id = %writer_cid, "connection evicted by hub");
                    break;
                }
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let Some(text) = protocol::encode(&event) else { continue };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    let last_pong = *writer_pong.lock();
                    awaiting_pong = awaiting_pong.filter(|sent| last_pong < *sent);
                    if awaiting_pong.is_some_and(|sent| sent.elapsed() >= limits.heartbeat_timeout) {
                        warn!(connection_id = %writer_cid, "heartbeat timeout");
                        break;
                    }
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    if awaiting_pong.is_none() {
                        awaiting_pong = Some(Instant::now());
                    }
                    trace!(connection_id = %writer_cid, "sent ping");
                }
            }
        }

        let _ = ws_tx.send(WsMessage::Close(None)).await;
        writer_done.cancel();
    });

    if let Some(session_id) = auto_join {
        ctx.join(session_id).await;
    }

    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = state.shutdown.cancelled() => break,
            frame = ws_rx.next() => {
                let Some(Ok(frame)) = frame else { break };
                match frame {
                    WsMessage::Text(text) => match protocol::decode(text.as_str()) {
                        Ok(event) => ctx.handle(event).await,
                        Err(e) => ctx.send_error("invalid_event", e),
                    },
                    WsMessage::Pong(_) => *last_pong.lock() = Instant::now(),
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    done.cancel();
    drop(ctx);
    let _ = writer.await;
    info!(connection_id = %connection_id, "WebSocket client disconnected");
}
