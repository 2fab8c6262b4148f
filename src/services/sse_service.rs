use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    error::ServiceError,
    services::{broadcast as room_broadcast, room_service},
    state::SharedState,
};

/// Subscribe a spectator to `code` and build the events it starts with.
///
/// The subscription is taken before the snapshot is read so no broadcast falls in between.
pub async fn spectate(
    state: &SharedState,
    code: &str,
) -> Result<(broadcast::Receiver<ServerEvent>, Vec<ServerEvent>), ServiceError> {
    let handle = room_service::handle_for(state, code).await?;
    let receiver = state.connections().subscribe_spectator(code);
    let room = match handle.snapshot().await {
        Ok(room) => room,
        Err(_) => room_service::snapshot(state, code).await?,
    };

    let handshake = Handshake {
        room: room.code.clone(),
        message: "spectator stream connected".into(),
        degraded: state.is_degraded().await,
    };
    let snapshot = room_broadcast::snapshot_message(&room);

    let mut initial = Vec::with_capacity(2);
    for event in [
        ServerEvent::json("handshake", &handshake),
        ServerEvent::json(snapshot.kind(), &snapshot),
    ] {
        match event {
            Ok(event) => initial.push(event),
            Err(err) => warn!(room = %code, error = %err, "failed to serialize spectator event"),
        }
    }

    info!(room = %code, "new spectator stream");
    Ok((receiver, initial))
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Convert a broadcast receiver into an SSE response, replaying `initial` first.
pub fn to_sse_stream(
    room: String,
    mut receiver: broadcast::Receiver<ServerEvent>,
    initial: Vec<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        for payload in initial {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(room = %room, skipped, "spectator lagging; events skipped");
                            continue;
                        }
                    }
                }
            }
        }

        info!(room = %room, "spectator stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
