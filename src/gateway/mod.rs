//! Live connection gateway.
//!
//! Each connection moves through
//! `Connecting -> Authenticating -> Authorizing -> Joined -> Relaying -> Closed`.
//! The first three phases run in the HTTP upgrade handler, before any room
//! registration; a failure there closes the socket with a policy code. The
//! connection is registered in its room before the upgrade response goes
//! out. Once joined, every inbound text frame is persisted and then fanned
//! out to the room through [`publish`], the same path the REST send uses.
//! A bad frame is logged and dropped without ending the session.

pub mod frames;
pub mod rooms;

pub use frames::{InboundFrame, ServerEvent};
pub use rooms::{resolve_room, RoomId, RoomMembership, RoomRegistry};

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sqlx::{Pool, Sqlite};
use tokio::sync::mpsc;

use crate::api::state::AppState;
use crate::auth::verify_credential;
use crate::db::{FriendRepository, MessageEnvelope, MessageRepository, User, UserId};
use crate::error::{AppError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Authenticating,
    Authorizing,
    Joined,
    Relaying,
    Closed,
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

/// A connection that passed every admission check.
#[derive(Debug, Clone)]
pub struct Admission {
    pub user: User,
    pub peer: UserId,
    pub room: RoomId,
}

/// Why and where admission stopped.
#[derive(Debug)]
pub struct Rejection {
    pub phase: Phase,
    pub error: AppError,
}

impl Rejection {
    fn at(phase: Phase) -> impl FnOnce(AppError) -> Rejection {
        move |error| Rejection { phase, error }
    }

    pub fn close_code(&self) -> u16 {
        match self.error.kind() {
            ErrorKind::Internal => close_code::ERROR,
            _ => close_code::POLICY,
        }
    }
}

fn parse_peer(raw: &str) -> Result<UserId, AppError> {
    match raw.trim().parse::<UserId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(AppError::Validation(format!("Invalid peer id: {:?}", raw))),
    }
}

/// Run the connect-time checks. Friendship is always re-read here, whatever
/// the client saw over REST.
pub async fn admit(
    pool: &Pool<Sqlite>,
    raw_peer: &str,
    token: Option<&str>,
) -> Result<Admission, Rejection> {
    let peer = parse_peer(raw_peer).map_err(Rejection::at(Phase::Connecting))?;
    let token = token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::Auth("Missing credential".to_string()))
        .map_err(Rejection::at(Phase::Connecting))?;

    tracing::debug!(peer_id = peer, phase = ?Phase::Authenticating, "verifying credential");
    let user = verify_credential(pool, token)
        .await
        .map_err(Rejection::at(Phase::Authenticating))?;

    tracing::debug!(user_id = user.id, peer_id = peer, phase = ?Phase::Authorizing, "checking friendship");
    let is_friend = FriendRepository::is_active_friend(pool, user.id, peer)
        .await
        .map_err(Rejection::at(Phase::Authorizing))?;
    if !is_friend {
        return Err(Rejection {
            phase: Phase::Authorizing,
            error: AppError::NotFriends(user.id, peer),
        });
    }

    let room = resolve_room(user.id, peer);
    Ok(Admission { user, peer, room })
}

/// Store a message and deliver it to every connection in the pair's room.
///
/// Holds the room's publishing turn across both steps, so live delivery
/// order matches history order whichever surface the message came from.
pub async fn publish(
    pool: &Pool<Sqlite>,
    rooms: &RoomRegistry,
    sender: UserId,
    receiver: UserId,
    content: &str,
) -> Result<MessageEnvelope, AppError> {
    let room = resolve_room(sender, receiver);
    let _turn = rooms.sequence(&room).await;

    let stored = MessageRepository::append(pool, sender, receiver, content).await?;
    let envelope = MessageEnvelope::from(stored);
    let delivered = rooms.broadcast(
        &room,
        &ServerEvent::NewMessage {
            message: envelope.clone(),
        },
    );
    tracing::debug!(%room, message_id = envelope.id, delivered, "message published");
    Ok(envelope)
}

/// One admitted connection's view of the world. Owned by its connection
/// task; nothing else touches it.
pub struct LiveSession {
    pool: Pool<Sqlite>,
    rooms: Arc<RoomRegistry>,
    user: User,
    peer: UserId,
    room: RoomId,
}

impl LiveSession {
    pub fn new(pool: Pool<Sqlite>, rooms: Arc<RoomRegistry>, admission: Admission) -> Self {
        LiveSession {
            pool,
            rooms,
            user: admission.user,
            peer: admission.peer,
            room: admission.room,
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn join(&self, outbox: mpsc::UnboundedSender<ServerEvent>) -> RoomMembership {
        self.rooms.join(self.room.clone(), self.user.id, outbox)
    }

    /// Handle one inbound text frame. `Ok(None)` means the frame was blank
    /// and silently dropped. The message is durable before anyone sees it.
    pub async fn relay(&self, text: &str) -> Result<Option<MessageEnvelope>, AppError> {
        let frame = InboundFrame::parse(text)?;
        if frame.content.trim().is_empty() {
            return Ok(None);
        }

        let envelope =
            publish(&self.pool, &self.rooms, self.user.id, self.peer, &frame.content).await?;
        Ok(Some(envelope))
    }
}

/// GET /ws/chat/:friend_id?token=...
pub async fn chat_socket(
    State(state): State<AppState>,
    Path(raw_peer): Path<String>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    match admit(&state.db, &raw_peer, params.token.as_deref()).await {
        Ok(admission) => {
            let session = LiveSession::new(state.db.clone(), state.rooms.clone(), admission);
            // Joined before the 101 goes out; events queue in the outbox
            // until the writer task starts. A failed upgrade drops the
            // callback and with it the membership.
            let (outbox, inbox) = mpsc::unbounded_channel::<ServerEvent>();
            let membership = session.join(outbox);
            tracing::info!(
                user_id = session.user.id,
                peer_id = session.peer,
                room = %membership.room(),
                connection = membership.connection(),
                phase = ?Phase::Joined,
                "live connection admitted"
            );
            ws.on_upgrade(move |socket| run_session(socket, session, membership, inbox))
        }
        Err(rejection) => {
            tracing::warn!(
                peer = %raw_peer,
                phase = ?rejection.phase,
                error = %rejection.error,
                "live connection rejected"
            );
            ws.on_upgrade(move |socket| close_rejected(socket, rejection))
        }
    }
}

async fn close_rejected(mut socket: WebSocket, rejection: Rejection) {
    let reason = match rejection.error.kind() {
        ErrorKind::Auth => "authentication failed",
        ErrorKind::Authorization => "not friends",
        ErrorKind::Internal => "internal error",
        _ => "invalid connection request",
    };
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: rejection.close_code(),
            reason: reason.into(),
        })))
        .await;
}

async fn run_session(
    socket: WebSocket,
    session: LiveSession,
    membership: RoomMembership,
    mut inbox: mpsc::UnboundedReceiver<ServerEvent>,
) {
    let (mut sink, mut stream) = socket.split();
    let connection = membership.connection();

    let writer = tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode outbound event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match session.relay(&text).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::debug!(user_id = session.user.id, "ignoring blank message");
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = session.user.id,
                        room = %session.room,
                        phase = ?Phase::Relaying,
                        error = %e,
                        "dropping inbound frame"
                    );
                }
            },
            Ok(Message::Binary(_)) => {
                tracing::debug!(user_id = session.user.id, "ignoring binary frame");
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(user_id = session.user.id, error = %e, "socket error");
                break;
            }
        }
    }

    drop(membership);
    writer.abort();
    tracing::info!(
        user_id = session.user.id,
        room = %session.room,
        connection,
        phase = ?Phase::Closed,
        "live connection closed"
    );
}
