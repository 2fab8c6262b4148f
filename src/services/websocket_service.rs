use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    dto::{room::RoomSnapshot, ws::{ClientMessage, ServerMessage}},
    error::ServiceError,
    services::{broadcast, room_service},
    state::{ConnectionId, Seat, SharedState, room::Room},
};

/// Handle the full lifecycle of a player WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let connection = state.connections().register(outbound_tx.clone());
    info!(connection = %connection, "player connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(connection = %connection, payload = %text, "received player message");
                handle_text(&state, connection, &text).await;
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {
                state.connections().send(
                    connection,
                    &ServerMessage::error(&ServiceError::InvalidInput(
                        "binary frames are not supported".into(),
                    )),
                );
            }
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection = %connection, error = %err, "websocket error");
                break;
            }
        }
    }

    match state.connections().detach(connection) {
        Some(Seat { room, identity }) => {
            info!(connection = %connection, room = %room, identity = %identity, "player disconnected")
        }
        None => info!(connection = %connection, "connection closed before joining"),
    }

    finalize(writer_task, outbound_tx).await;
}

/// Parse one text frame, run it, and answer the sender.
pub async fn handle_text(state: &SharedState, connection: ConnectionId, text: &str) {
    let result = match ClientMessage::from_json_str(text) {
        Ok(message) => {
            let action = message.action();
            handle_message(state, connection, message)
                .await
                .inspect_err(|err| {
                    debug!(connection = %connection, action, error = %err, "player action rejected")
                })
        }
        Err(err) => Err(err),
    };

    let reply = result.unwrap_or_else(|err| ServerMessage::error(&err));
    if !state.connections().send(connection, &reply) {
        debug!(connection = %connection, "reply dropped; connection gone");
    }
}

async fn handle_message(
    state: &SharedState,
    connection: ConnectionId,
    message: ClientMessage,
) -> Result<ServerMessage, ServiceError> {
    let action = message.action();
    match message {
        ClientMessage::CreateRoom {
            identity,
            name,
            total_rounds,
        } => {
            let room = room_service::create_room(state, identity.clone(), name, total_rounds).await?;
            Ok(seat(state, connection, identity, &room))
        }
        ClientMessage::Join {
            code,
            identity,
            name,
        } => {
            let room = room_service::join_room(state, &code, identity.clone(), name).await?;
            Ok(seat(state, connection, identity, &room))
        }
        ClientMessage::Resume { code, identity } => {
            let room = room_service::resume(state, &code, identity.clone()).await?;
            Ok(seat(state, connection, identity, &room))
        }
        ClientMessage::Snapshot => {
            let Seat { room, .. } = require_seat(state, connection)?;
            let room = room_service::snapshot(state, &room).await?;
            Ok(broadcast::snapshot_message(&room))
        }
        ClientMessage::Ready { songs } => {
            let Seat { room, identity } = require_seat(state, connection)?;
            let songs = songs.map(|songs| songs.into_iter().map(Into::into).collect());
            room_service::set_ready(state, &room, identity, songs).await?;
            Ok(ack(action))
        }
        ClientMessage::Submit { track_id } => {
            let Seat { room, identity } = require_seat(state, connection)?;
            room_service::submit_song(state, &room, identity, track_id).await?;
            Ok(ack(action))
        }
        ClientMessage::Vote { player_id } => {
            let Seat { room, identity } = require_seat(state, connection)?;
            room_service::cast_vote(state, &room, identity, player_id).await?;
            Ok(ack(action))
        }
        ClientMessage::AddBots { count } => {
            let Seat { room, identity } = require_seat(state, connection)?;
            room_service::add_bots(state, &room, identity, count).await?;
            Ok(ack(action))
        }
        ClientMessage::Advance => {
            let Seat { room, identity } = require_seat(state, connection)?;
            room_service::advance(state, &room, identity).await?;
            Ok(ack(action))
        }
        ClientMessage::Unknown => Err(ServiceError::InvalidInput("unknown message type".into())),
    }
}

fn seat(state: &SharedState, connection: ConnectionId, identity: String, room: &Room) -> ServerMessage {
    state.connections().attach(connection, &room.code, &identity);
    info!(connection = %connection, room = %room.code, identity = %identity, "player attached");
    ServerMessage::Joined {
        identity,
        room: RoomSnapshot::from(room),
    }
}

fn require_seat(state: &SharedState, connection: ConnectionId) -> Result<Seat, ServiceError> {
    state
        .connections()
        .seat(connection)
        .ok_or_else(|| ServiceError::Unauthorized("join a room first".into()))
}

fn ack(action: &str) -> ServerMessage {
    ServerMessage::Ack {
        action: action.to_string(),
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
