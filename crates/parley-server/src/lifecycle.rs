//! Per-connection lifecycle, from upgrade through teardown.
//!
//! A connection starts `Unauthenticated`. The only frame it may send in that
//! state is `register`; a verified credential binds it to its user and moves
//! it to `Registered`. Any exit path (peer close, transport error, protocol
//! violation, heartbeat timeout, shutdown) ends in `Closed`, and closing a
//! registered connection releases its binding unless a newer connection has
//! already taken it over.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use parley_auth::IdentityVerifier;
use parley_core::{ClientMessage, OutboundEvent, UserId};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connection::ClientConnection;
use crate::registry::ConnectionRegistry;
use crate::router::DeliveryRouter;

/// Time the writer gets to flush the close frame before it is aborted.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Unauthenticated,
    Registered(UserId),
    Closed,
}

/// Why a connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Credential missing, invalid or expired.
    Unauthorized,
    /// Unparseable frame, unknown type, or a non-register frame before registering.
    Malformed,
    PeerClosed,
    TransportError,
    HeartbeatTimeout,
    Shutdown,
}

impl CloseReason {
    /// Close code sent to the peer, when the server initiates the close.
    pub fn code(self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(4401),
            Self::Malformed => Some(4400),
            Self::Shutdown => Some(1001),
            Self::HeartbeatTimeout => Some(1011),
            Self::PeerClosed | Self::TransportError => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Malformed => "malformed message",
            Self::PeerClosed => "peer closed",
            Self::TransportError => "transport error",
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::Shutdown => "server shutting down",
        }
    }

    fn close_frame(self) -> Option<CloseFrame> {
        self.code().map(|code| CloseFrame {
            code,
            reason: Utf8Bytes::from_static(self.as_str()),
        })
    }
}

/// Result of handling one inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Terminate(CloseReason),
}

/// Protocol state for one connection, independent of the socket.
pub struct Session {
    connection: Arc<ClientConnection>,
    registry: Arc<ConnectionRegistry>,
    router: DeliveryRouter,
    verifier: Arc<dyn IdentityVerifier>,
    state: ConnectionState,
}

impl Session {
    pub fn new(
        connection: Arc<ClientConnection>,
        router: DeliveryRouter,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        Self {
            connection,
            registry: router.registry().clone(),
            router,
            verifier,
            state: ConnectionState::Unauthenticated,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn identity(&self) -> Option<UserId> {
        match self.state {
            ConnectionState::Registered(user) => Some(user),
            _ => None,
        }
    }

    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }

    /// Apply one inbound text frame.
    pub async fn handle_text(&mut self, raw: &str) -> Step {
        if self.state == ConnectionState::Closed {
            return Step::Terminate(CloseReason::Malformed);
        }

        let message = match ClientMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(conn_id = %self.connection.id, error = %e, "malformed frame");
                return Step::Terminate(CloseReason::Malformed);
            }
        };

        match (self.state, message) {
            (_, ClientMessage::Register { token }) => self.register(&token).await,
            (ConnectionState::Registered(me), ClientMessage::Typing { to }) => {
                let _ = self.router.deliver(to, &OutboundEvent::Typing { from: me });
                Step::Continue
            }
            (ConnectionState::Registered(me), ClientMessage::Seen { to, message_id }) => {
                let _ = self.router.deliver(to, &OutboundEvent::Seen { from: me, message_id });
                Step::Continue
            }
            (_, other) => {
                warn!(conn_id = %self.connection.id, frame = ?other, "frame before register");
                Step::Terminate(CloseReason::Malformed)
            }
        }
    }

    /// Verify a credential and bind this connection to its user.
    ///
    /// A registered connection may register again. If the identity changes,
    /// the old binding is released first (only if it is still ours).
    async fn register(&mut self, credential: &str) -> Step {
        let user = match self.verifier.verify(credential).await {
            Ok(user) => user,
            Err(e) => {
                warn!(
                    conn_id = %self.connection.id,
                    error_kind = e.error_kind(),
                    "registration rejected"
                );
                return Step::Terminate(CloseReason::Unauthorized);
            }
        };

        if let ConnectionState::Registered(previous) = self.state {
            if previous != user {
                let _ = self.registry.unbind(previous, &self.connection);
            }
        }
        let _ = self.registry.bind(user, self.connection.clone());
        self.state = ConnectionState::Registered(user);
        info!(conn_id = %self.connection.id, user_id = %user, "registered");
        Step::Continue
    }

    /// Move to `Closed`. Idempotent.
    ///
    /// Returns the identity whose binding this call removed. `None` when the
    /// connection never registered, was already closed, or had been
    /// superseded by a newer connection for the same identity.
    pub fn close(&mut self) -> Option<UserId> {
        let previous = std::mem::replace(&mut self.state, ConnectionState::Closed);
        self.connection.close();
        let ConnectionState::Registered(user) = previous else {
            return None;
        };
        if self.registry.unbind(user, &self.connection) {
            return Some(user);
        }
        match self.registry.binding(user) {
            Some(current) => debug!(
                conn_id = %self.connection.id,
                user_id = %user,
                superseded_by = %current.connection.id,
                since = %current.bound_at,
                "binding already superseded"
            ),
            None => debug!(conn_id = %self.connection.id, user_id = %user, "binding already gone"),
        }
        None
    }
}

/// Everything a connection task needs, cloned per upgrade.
#[derive(Clone)]
pub struct LifecycleContext {
    pub router: DeliveryRouter,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub shutdown: CancellationToken,
}

/// Drive one upgraded socket until it closes.
#[instrument(skip_all, fields(conn_id))]
pub async fn run_connection(ws: WebSocket, ctx: LifecycleContext) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel::<String>(ctx.max_send_queue);
    let connection = Arc::new(ClientConnection::new(send_tx));
    let _ = tracing::Span::current().record("conn_id", tracing::field::display(&connection.id));

    info!("client connected");
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);

    let (close_tx, close_rx) = oneshot::channel();
    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        close_rx,
        connection.clone(),
        ctx.heartbeat_interval,
        ctx.heartbeat_timeout,
    ));
    let mut writer_done = false;

    let mut session = Session::new(connection.clone(), ctx.router.clone(), ctx.verifier.clone());

    let reason = loop {
        tokio::select! {
            () = ctx.shutdown.cancelled() => break CloseReason::Shutdown,
            result = &mut writer => {
                writer_done = true;
                break result.unwrap_or(CloseReason::TransportError);
            }
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(error = %e, "read failed");
                        break CloseReason::TransportError;
                    }
                    None => break CloseReason::PeerClosed,
                };
                connection.mark_alive();

                let text = match msg {
                    Message::Text(t) => t.to_string(),
                    Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                        Ok(s) => s,
                        Err(_) => {
                            warn!(len = data.len(), "non-UTF8 binary frame");
                            break CloseReason::Malformed;
                        }
                    },
                    Message::Close(_) => break CloseReason::PeerClosed,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                if let Step::Terminate(reason) = session.handle_text(&text).await {
                    break reason;
                }
            }
        }
    };

    let released = session.close();

    if !writer_done {
        let _ = close_tx.send(reason.close_frame());
        if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
            writer.abort();
        }
    }

    info!(
        reason = reason.as_str(),
        released = ?released,
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!("ws_disconnections_total").increment(1);
    gauge!("ws_connections_active").decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(connection.age().as_secs_f64());
}

/// Forward queued pushes to the socket and keep the peer honest with pings.
///
/// Returns when the reader asks for a close (the return value is then
/// ignored), when the peer has been silent past `timeout`, or when a write
/// fails.
async fn write_loop<S>(
    mut ws_tx: S,
    mut queue: mpsc::Receiver<String>,
    mut close_rx: oneshot::Receiver<Option<CloseFrame>>,
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
) -> CloseReason
where
    S: Sink<Message> + Unpin,
{
    let mut ping = tokio::time::interval(interval);
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            frame = &mut close_rx => {
                let frame = frame.ok().flatten();
                let _ = ws_tx.send(Message::Close(frame)).await;
                let _ = ws_tx.close().await;
                return CloseReason::PeerClosed;
            }
            msg = queue.recv() => {
                let Some(text) = msg else {
                    return CloseReason::TransportError;
                };
                let frame = Message::Text(text.into());
                if let Err(reason) = send_within(&mut ws_tx, frame, timeout).await {
                    return reason;
                }
            }
            _ = ping.tick() => {
                if connection.idle_for() > timeout {
                    warn!(idle = ?connection.idle_for(), "peer unresponsive, disconnecting");
                    let frame = CloseReason::HeartbeatTimeout.close_frame();
                    let _ = send_within(&mut ws_tx, Message::Close(frame), CLOSE_GRACE).await;
                    return CloseReason::HeartbeatTimeout;
                }
                let ping_frame = Message::Ping(Vec::new().into());
                if let Err(reason) = send_within(&mut ws_tx, ping_frame, timeout).await {
                    return reason;
                }
            }
        }
    }
}

/// Write one frame, giving up if the peer has not drained it within `limit`.
///
/// A peer that stops reading stalls the sink and would starve the idle check.
async fn send_within<S>(ws_tx: &mut S, msg: Message, limit: Duration) -> Result<(), CloseReason>
where
    S: Sink<Message> + Unpin,
{
    match tokio::time::timeout(limit, ws_tx.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(CloseReason::TransportError),
        Err(_) => {
            warn!(limit = ?limit, "outbound frame stalled, disconnecting");
            Err(CloseReason::HeartbeatTimeout)
        }
    }
}
