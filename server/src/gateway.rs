//! Connection gateway: handshake validation and the per-socket driver.

use crate::error::HandshakeError;
use crate::fanout;
use crate::hub::Hub;
use crate::identity::{ConnectionId, Principal, RoomId};
use crate::session::RoomSession;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use huddle_protocol::{ErrorNotice, Handshake, Outbound};
use tracing::{debug, info, warn};

/// Resolve the room and principal for a new connection.
///
/// The room comes from the handshake, else from the upgrade request's
/// `room` header. A registered user id is taken from `user.user_id`, else
/// from a numeric `user.id`; anyone else is a guest.
pub fn resolve(
    handshake: &Handshake,
    header_room: Option<&str>,
    connection_id: ConnectionId,
) -> Result<(RoomId, Principal), HandshakeError> {
    let room = handshake
        .auth
        .room
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .or_else(|| header_room.map(str::trim).filter(|r| !r.is_empty()))
        .ok_or(HandshakeError::MissingRoom)?;
    let user = handshake
        .auth
        .user
        .as_ref()
        .ok_or(HandshakeError::MissingIdentity)?;
    let stable_user_id = user
        .user_id
        .as_ref()
        .and_then(|id| id.as_i64())
        .or_else(|| user.id.as_ref().and_then(|id| id.as_i64()));
    let display_name = user
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Principal::guest_name(&connection_id));
    Ok((
        room.to_string(),
        Principal::new(connection_id, stable_user_id, display_name),
    ))
}

/// Validate a handshake frame and build the (unbound) session for it.
pub fn handshake(
    hub: &Hub,
    text: &str,
    header_room: Option<&str>,
) -> Result<RoomSession, HandshakeError> {
    let parsed = Handshake::parse(text).map_err(|_| HandshakeError::Malformed)?;
    let (room, principal) = resolve(&parsed, header_room, ConnectionId::new())?;
    Ok(RoomSession::new(hub.clone(), room, principal))
}

/// Drive one socket from handshake to teardown.
pub async fn serve_socket(socket: WebSocket, hub: Hub, header_room: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    let first = tokio::time::timeout(hub.settings.handshake_timeout, async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => return Some(text),
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    })
    .await;

    let session = match first {
        Ok(Some(text)) => handshake(&hub, &text, header_room.as_deref()),
        Ok(None) => return,
        Err(_) => Err(HandshakeError::Malformed),
    };
    let mut session = match session {
        Ok(session) => session,
        Err(e) => {
            info!(reason = %e, "handshake rejected");
            let reject = Outbound::ConnectError(ErrorNotice {
                message: e.to_string(),
            });
            if let Ok(frame) = reject.encode() {
                let _ = sender.send(Message::Text(frame)).await;
            }
            let _ = sender.close().await;
            return;
        }
    };

    let (tx, mut rx) = fanout::outlet();
    session.bind(tx).await;

    loop {
        tokio::select! {
            Some(frame) = rx.recv() => {
                if sender.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "socket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    session.close().await;
    // flush whatever the teardown left for us; the peer may already be gone
    while let Ok(frame) = rx.try_recv() {
        if sender.send(Message::Text(frame.to_string())).await.is_err() {
            break;
        }
    }
    if let Err(e) = sender.close().await {
        warn!(error = %e, "failed to close socket");
    }
}
