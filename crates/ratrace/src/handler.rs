//! Per-connection handler: handshake, auth, and action routing.
//!
//! Each accepted connection gets its own Tokio task running this handler:
//!   1. Receive `Handshake` → check version, authenticate token
//!   2. Bind the session and register the outbound channel with the engine
//!   3. Loop: decode client actions → engine ops, rejections → unicast
//!
//! Outbound frames go through one writer task per connection, so engine
//! broadcasts and direct replies share a single sequence counter.

use std::sync::Arc;
use std::time::Duration;

use ratrace_protocol::{ClientMessage, Codec, Envelope, ErrorCode, PlayerId, ServerMessage};
use ratrace_room::{PlayerSender, RoomOp};
use ratrace_session::Authenticator;
use ratrace_transport::{
    Connection, ConnectionId, FrameReader, FrameWriter, WebSocketConnection, WebSocketReader,
    WebSocketWriter,
};
use tokio::sync::mpsc;

use crate::RatraceError;
use crate::server::{PROTOCOL_VERSION, ServerState};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Releases the player's session when the handler exits and feeds the
/// implicit disconnect into the engine.
///
/// `Drop` is synchronous, so the async part runs in a spawned task. The
/// release and the engine call happen under the sessions lock, which
/// orders them against a reconnect binding the same player.
struct SessionGuard<A: Authenticator, C: Codec> {
    player_id: PlayerId,
    connection: ConnectionId,
    state: Arc<ServerState<A, C>>,
}

impl<A: Authenticator, C: Codec> Drop for SessionGuard<A, C> {
    fn drop(&mut self) {
        let player_id = self.player_id;
        let connection = self.connection;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut sessions = state.sessions.lock().await;
            match sessions.release(player_id, connection) {
                Ok(last_room) => {
                    if let Err(e) = state.engine.disconnect(player_id, last_room).await {
                        tracing::warn!(%player_id, error = %e, "engine missed disconnect");
                    }
                }
                Err(e) => tracing::debug!(%player_id, error = %e, "session not released"),
            }
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A, C>>,
) -> Result<(), RatraceError>
where
    A: Authenticator,
    C: Codec,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = %conn.peer_addr(), "handling new connection");
    let (mut reader, mut writer) = conn.split();

    let player_id = perform_handshake(&mut reader, &mut writer, &state).await?;
    tracing::info!(%conn_id, %player_id, "player authenticated");

    let (outbox, inbox) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(writer, inbox, Arc::clone(&state)));

    // Bind and connect under one lock so a late release from this
    // player's previous socket cannot interleave.
    {
        let mut sessions = state.sessions.lock().await;
        let last_room = match sessions.bind(player_id, conn_id) {
            Ok(room) => room,
            Err(e) => {
                let _ = outbox.send(ServerMessage::Error {
                    code: ErrorCode::BadRequest,
                    message: e.to_string(),
                });
                return Err(e.into());
            }
        };
        let _ = outbox.send(ServerMessage::HandshakeAck {
            player_id,
            server_time: state.clock.now_ms(),
        });
        if let Err(e) = state.engine.connect(player_id, last_room, outbox.clone()).await {
            let _ = sessions.release(player_id, conn_id);
            let _ = outbox.send(ServerMessage::Error {
                code: e.code(),
                message: e.to_string(),
            });
            return Err(e.into());
        }
    }
    let _guard = SessionGuard {
        player_id,
        connection: conn_id,
        state: Arc::clone(&state),
    };

    loop {
        let data = match tokio::time::timeout(state.idle_timeout, reader.recv()).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(%player_id, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(%player_id, error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::info!(%player_id, "connection idle too long");
                break;
            }
        };

        let envelope: Envelope<ClientMessage> = match state.codec.decode(&data) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(%player_id, error = %e, "failed to decode envelope");
                let _ = outbox.send(ServerMessage::Error {
                    code: ErrorCode::BadRequest,
                    message: e.to_string(),
                });
                continue;
            }
        };

        if dispatch(&state, player_id, envelope.payload, &outbox).await {
            break;
        }
    }

    // _guard drops here → session release and engine disconnect.
    Ok(())
}

/// Receives `Handshake`, validates it, and authenticates the token.
/// Rejections are written straight to the socket before the writer task
/// exists.
async fn perform_handshake<A, C>(
    reader: &mut WebSocketReader,
    writer: &mut WebSocketWriter,
    state: &ServerState<A, C>,
) -> Result<PlayerId, RatraceError>
where
    A: Authenticator,
    C: Codec,
{
    let data = match tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => return Err(invalid("connection closed before handshake")),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(invalid("handshake timed out")),
    };

    let first = state
        .codec
        .decode::<Envelope<ClientMessage>>(&data)
        .map(|env| env.payload);

    let (version, token) = match first {
        Ok(ClientMessage::Handshake { version, token }) => (version, token),
        _ => {
            reject(writer, state, ErrorCode::BadRequest, "expected Handshake").await?;
            return Err(invalid("first message must be Handshake"));
        }
    };

    if version != PROTOCOL_VERSION {
        let reason = format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}");
        reject(writer, state, ErrorCode::BadRequest, &reason).await?;
        return Err(invalid("protocol version mismatch"));
    }

    match state.auth.authenticate(token.as_deref().unwrap_or("")).await {
        Ok(player_id) => Ok(player_id),
        Err(e) => {
            reject(writer, state, ErrorCode::Unauthorized, "unauthorized").await?;
            Err(e.into())
        }
    }
}

/// Handles one client action. Returns `true` if the connection should
/// close.
async fn dispatch<A, C>(
    state: &ServerState<A, C>,
    player_id: PlayerId,
    msg: ClientMessage,
    outbox: &PlayerSender,
) -> bool
where
    A: Authenticator,
    C: Codec,
{
    let reply = |msg: ServerMessage| {
        let _ = outbox.send(msg);
    };

    match msg {
        ClientMessage::Heartbeat { client_time } => {
            reply(ServerMessage::HeartbeatAck {
                client_time,
                server_time: state.clock.now_ms(),
            });
        }
        ClientMessage::ListRooms => match state.engine.list_rooms().await {
            Ok(rooms) => reply(ServerMessage::RoomList { rooms }),
            Err(e) => reply(ServerMessage::Error {
                code: e.code(),
                message: e.to_string(),
            }),
        },
        ClientMessage::Disconnect { reason } => {
            tracing::info!(%player_id, %reason, "client disconnected");
            return true;
        }
        ClientMessage::Handshake { .. } => reply(ServerMessage::Error {
            code: ErrorCode::BadRequest,
            message: "already handshaken".into(),
        }),
        action => {
            let negotiation = action.is_role_negotiation();
            let target = action.room_id();
            let Some(op) = into_op(action) else {
                return false;
            };
            let membership = match &op {
                RoomOp::Create { .. } | RoomOp::Join { .. } => Some(true),
                RoomOp::Leave { .. } => Some(false),
                _ => None,
            };

            match state.engine.apply(player_id, op).await {
                Ok(room_id) => {
                    if let Some(joined) = membership {
                        let room = joined.then_some(room_id);
                        if let Err(e) = state.sessions.lock().await.set_room(player_id, room) {
                            tracing::debug!(%player_id, error = %e, "session room not recorded");
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(%player_id, error = %e, "action rejected");
                    match (negotiation, target) {
                        (true, Some(room_id)) => reply(ServerMessage::RoleSelectionRejected {
                            room_id,
                            code: e.code(),
                            reason: e.to_string(),
                        }),
                        _ => reply(ServerMessage::Error {
                            code: e.code(),
                            message: e.to_string(),
                        }),
                    }
                }
            }
        }
    }

    false
}

/// Maps a room-level client action onto an engine op.
fn into_op(msg: ClientMessage) -> Option<RoomOp> {
    let op = match msg {
        ClientMessage::CreateRoom {
            settings,
            creator_name,
        } => RoomOp::Create {
            settings,
            creator_name,
        },
        ClientMessage::JoinRoom {
            room_id,
            player_name,
            password,
        } => RoomOp::Join {
            room_id,
            player_name,
            password,
        },
        ClientMessage::LeaveRoom { room_id } => RoomOp::Leave { room_id },
        ClientMessage::SelectRole { room_id, role_id } => RoomOp::SelectRole { room_id, role_id },
        ClientMessage::ConfirmRole { room_id, confirmed } => {
            RoomOp::ConfirmRole { room_id, confirmed }
        }
        ClientMessage::SelectGoal { room_id, goal_id } => RoomOp::SelectGoal { room_id, goal_id },
        ClientMessage::SetReady { room_id } => RoomOp::SetReady { room_id },
        ClientMessage::StartGame { room_id } => RoomOp::Start { room_id },
        ClientMessage::RollForTurn { room_id } => RoomOp::Roll { room_id },
        ClientMessage::PassTurn { room_id, turn } => RoomOp::Pass { room_id, turn },
        ClientMessage::Handshake { .. }
        | ClientMessage::Heartbeat { .. }
        | ClientMessage::ListRooms
        | ClientMessage::Disconnect { .. } => return None,
    };
    Some(op)
}

/// Drains the connection's outbox onto the socket, numbering frames from
/// zero. Ends when every sender is gone (handler exited and the engine
/// dropped its registration) or the socket fails.
async fn write_loop<A, C>(
    mut writer: WebSocketWriter,
    mut inbox: mpsc::UnboundedReceiver<ServerMessage>,
    state: Arc<ServerState<A, C>>,
) where
    A: Authenticator,
    C: Codec,
{
    let mut seq: u64 = 0;
    while let Some(payload) = inbox.recv().await {
        let envelope = Envelope {
            seq,
            timestamp: state.clock.now_ms(),
            payload,
        };
        seq += 1;

        let bytes = match state.codec.encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode outbound frame");
                continue;
            }
        };
        if writer.send(&bytes).await.is_err() {
            return;
        }
    }
    let _ = writer.close().await;
}

async fn reject<A, C>(
    writer: &mut WebSocketWriter,
    state: &ServerState<A, C>,
    code: ErrorCode,
    message: &str,
) -> Result<(), RatraceError>
where
    A: Authenticator,
    C: Codec,
{
    let envelope = Envelope {
        seq: 0,
        timestamp: state.clock.now_ms(),
        payload: ServerMessage::Error {
            code,
            message: message.to_string(),
        },
    };
    let bytes = state.codec.encode(&envelope)?;
    writer.send(&bytes).await?;
    Ok(())
}

fn invalid(reason: &str) -> RatraceError {
    ratrace_protocol::ProtocolError::InvalidMessage(reason.into()).into()
}
