//! Room lifecycle entry points: creation, actor lookup and intent dispatch.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::{
    dao::storage::StorageError,
    error::ServiceError,
    services::{
        room_actor::{self, PlayerIntent, RoomHandle},
        room_code,
    },
    state::{
        SharedState,
        room::{Room, Track},
    },
};

/// Upper bound on the time a caller waits for a room to process an intent.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Attempts made when the room actor stops while a request is in flight.
const DISPATCH_ATTEMPTS: usize = 2;

/// Create a lobby hosted by `identity` and start its actor.
pub async fn create_room(
    state: &SharedState,
    identity: String,
    name: String,
    total_rounds: u32,
) -> Result<Room, ServiceError> {
    let config = state.config();
    if total_rounds == 0 || total_rounds > config.max_rounds() {
        return Err(ServiceError::InvalidInput(format!(
            "total_rounds must be between 1 and {}",
            config.max_rounds()
        )));
    }

    let categories = {
        let mut pool = config.categories.clone();
        pool.shuffle(&mut rand::rng());
        pool.truncate(total_rounds as usize);
        pool
    };

    let store = state.require_room_store().await?;
    for _ in 0..room_code::MAX_CODE_ATTEMPTS {
        let code = room_code::unused_code(store.as_ref()).await?;
        let room = Room::new(code, identity.clone(), name.clone(), categories.clone());

        match store.insert_room(room.clone().into()).await {
            Ok(()) => {
                info!(room = %room.code, host = %identity, total_rounds, "room created");
                let handle = room_actor::spawn(state.clone(), room.clone());
                state.rooms().insert(room.code.clone(), handle);
                return Ok(room);
            }
            Err(StorageError::Conflict { code }) => {
                warn!(room = %code, "room code taken concurrently; drawing another");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::InvalidState(
        "could not allocate a free room code".into(),
    ))
}

/// Handle of the actor owning `code`, loading the room from storage when needed.
pub async fn handle_for(state: &SharedState, code: &str) -> Result<RoomHandle, ServiceError> {
    if let Some(handle) = state.rooms().get(code) {
        if !handle.is_closed() {
            return Ok(handle.clone());
        }
    }

    let store = state.require_room_store().await?;
    let Some(entity) = store.find_room(code.to_string()).await? else {
        return Err(ServiceError::RoomNotFound(code.to_string()));
    };

    let handle = match state.rooms().entry(code.to_string()) {
        Entry::Occupied(mut slot) => {
            if slot.get().is_closed() {
                slot.insert(room_actor::spawn(state.clone(), entity.into()));
            }
            slot.get().clone()
        }
        Entry::Vacant(slot) => {
            debug!(room = %code, "loading room actor from storage");
            slot.insert(room_actor::spawn(state.clone(), entity.into()))
                .clone()
        }
    };
    Ok(handle)
}

/// Route an intent to the room actor and wait for the resulting room.
pub async fn dispatch(
    state: &SharedState,
    code: &str,
    intent: PlayerIntent,
) -> Result<Room, ServiceError> {
    for attempt in 1..=DISPATCH_ATTEMPTS {
        let handle = handle_for(state, code).await?;
        match tokio::time::timeout(REQUEST_TIMEOUT, handle.request(intent.clone())).await {
            Ok(Ok(outcome)) => return outcome,
            Ok(Err(stopped)) => {
                warn!(room = %code, attempt, error = %stopped, "room actor stopped during request");
                let id = handle.id();
                state.rooms().remove_if(code, |_, current| current.id() == id);
            }
            Err(_) => {
                warn!(room = %code, "room did not answer in time");
                return Err(ServiceError::Timeout);
            }
        }
    }
    Err(ServiceError::Timeout)
}

/// Add `identity` to the lobby of `code`.
pub async fn join_room(
    state: &SharedState,
    code: &str,
    identity: String,
    name: String,
) -> Result<Room, ServiceError> {
    dispatch(state, code, PlayerIntent::Join { identity, name }).await
}

/// Reattach a known player; the room is returned unchanged.
pub async fn resume(state: &SharedState, code: &str, identity: String) -> Result<Room, ServiceError> {
    dispatch(state, code, PlayerIntent::Resume { identity }).await
}

/// Mark `identity` ready, replacing its song pool when `songs` is given.
pub async fn set_ready(
    state: &SharedState,
    code: &str,
    identity: String,
    songs: Option<Vec<Track>>,
) -> Result<Room, ServiceError> {
    dispatch(state, code, PlayerIntent::Ready { identity, songs }).await
}

/// Submit a song from the player's pool for the current round.
pub async fn submit_song(
    state: &SharedState,
    code: &str,
    identity: String,
    track_id: String,
) -> Result<Room, ServiceError> {
    dispatch(state, code, PlayerIntent::Submit { identity, track_id }).await
}

/// Vote for the submission of `target`.
pub async fn cast_vote(
    state: &SharedState,
    code: &str,
    identity: String,
    target: String,
) -> Result<Room, ServiceError> {
    dispatch(state, code, PlayerIntent::Vote { identity, target }).await
}

/// Add `count` simulated players, then mark `identity` ready after a short delay.
pub async fn add_bots(
    state: &SharedState,
    code: &str,
    identity: String,
    count: usize,
) -> Result<Room, ServiceError> {
    dispatch(state, code, PlayerIntent::AddBots { identity, count }).await
}

/// Force the next phase on behalf of the host.
pub async fn advance(state: &SharedState, code: &str, identity: String) -> Result<Room, ServiceError> {
    dispatch(state, code, PlayerIntent::Advance { identity }).await
}

/// Current room as held by its actor.
pub async fn snapshot(state: &SharedState, code: &str) -> Result<Room, ServiceError> {
    let handle = handle_for(state, code).await?;
    match tokio::time::timeout(REQUEST_TIMEOUT, handle.snapshot()).await {
        Ok(Ok(room)) => Ok(room),
        Ok(Err(_)) => {
            let store = state.require_room_store().await?;
            store
                .find_room(code.to_string())
                .await?
                .map(Room::from)
                .ok_or_else(|| ServiceError::RoomNotFound(code.to_string()))
        }
        Err(_) => Err(ServiceError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::room_store::{RoomStore, memory::MemoryRoomStore},
        state::{
            AppState,
            room::{RoomStatus, RoundPhase, tests::pool},
        },
    };

    async fn state_with_store() -> (SharedState, MemoryRoomStore) {
        let state = AppState::new(AppConfig::default());
        let store = MemoryRoomStore::new();
        state.set_room_store(Arc::new(store.clone())).await;
        (state, store)
    }

    #[tokio::test]
    async fn create_room_persists_a_waiting_lobby() {
        let (state, store) = state_with_store().await;
        let room = create_room(&state, "host".into(), "Host".into(), 3)
            .await
            .unwrap();

        assert_eq!(room.status, RoomStatus::Waiting);
        assert_eq!(room.total_rounds, 3);
        assert_eq!(room.categories.len(), 3);
        let distinct: std::collections::HashSet<_> = room.categories.iter().collect();
        assert_eq!(distinct.len(), 3);
        assert!(store.room_exists(room.code.clone()).await.unwrap());
        assert!(state.rooms().contains_key(&room.code));
    }

    #[tokio::test]
    async fn create_room_rejects_out_of_range_rounds() {
        let (state, _) = state_with_store().await;
        let max = state.config().max_rounds();
        for rounds in [0, max + 1] {
            let err = create_room(&state, "host".into(), "Host".into(), rounds)
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::InvalidInput(_)));
        }
    }

    #[tokio::test]
    async fn degraded_mode_rejects_creation() {
        let state = AppState::new(AppConfig::default());
        let err = create_room(&state, "host".into(), "Host".into(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let (state, _) = state_with_store().await;
        let err = join_room(&state, "ZZZZZZ", "p2".into(), "Two".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::RoomNotFound(code) if code == "ZZZZZZ"));
    }

    #[tokio::test]
    async fn joining_a_playing_room_leaves_players_untouched() {
        let (state, _) = state_with_store().await;
        let room = create_room(&state, "host".into(), "Host".into(), 1)
            .await
            .unwrap();
        let code = room.code;
        join_room(&state, &code, "p2".into(), "Two".into())
            .await
            .unwrap();
        set_ready(&state, &code, "host".into(), Some(pool(&["h1"])))
            .await
            .unwrap();
        set_ready(&state, &code, "p2".into(), Some(pool(&["a1"])))
            .await
            .unwrap();

        let before = snapshot(&state, &code).await.unwrap();
        assert_eq!(before.status, RoomStatus::Playing);

        let err = join_room(&state, &code, "late".into(), "Late".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::GameAlreadyInProgress(_)));
        let after = snapshot(&state, &code).await.unwrap();
        assert_eq!(after.players, before.players);
        assert_eq!(after.version, before.version);
    }

    #[tokio::test]
    async fn ready_without_songs_needs_a_stored_pool() {
        let (state, _) = state_with_store().await;
        let code = create_room(&state, "host".into(), "Host".into(), 1)
            .await
            .unwrap()
            .code;

        let err = set_ready(&state, &code, "host".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert!(!snapshot(&state, &code).await.unwrap().players["host"].is_ready);

        set_ready(&state, &code, "host".into(), Some(pool(&["h1"])))
            .await
            .unwrap();
        let room = set_ready(&state, &code, "host".into(), None).await.unwrap();
        assert!(room.players["host"].is_ready);
        assert_eq!(room.players["host"].song_pool, pool(&["h1"]));
    }

    #[tokio::test]
    async fn stopped_actor_is_reloaded_from_storage() {
        let (state, _) = state_with_store().await;
        let room = create_room(&state, "host".into(), "Host".into(), 2)
            .await
            .unwrap();
        join_room(&state, &room.code, "p2".into(), "Two".into())
            .await
            .unwrap();

        let first = state.rooms().get(&room.code).unwrap().clone();
        first.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let reloaded = resume(&state, &room.code, "p2".into()).await.unwrap();
        assert_eq!(reloaded.players.len(), 2);
        let second = state.rooms().get(&room.code).unwrap().clone();
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test(start_paused = true)]
    async fn all_ready_starts_the_first_round() {
        let (state, _) = state_with_store().await;
        let room = create_room(&state, "host".into(), "Host".into(), 2)
            .await
            .unwrap();
        let code = room.code;
        join_room(&state, &code, "p2".into(), "Two".into())
            .await
            .unwrap();
        set_ready(&state, &code, "host".into(), Some(pool(&["h1"])))
            .await
            .unwrap();
        let waiting = set_ready(&state, &code, "p2".into(), Some(pool(&["a1"])))
            .await
            .unwrap();
        // the reply is sent before the start transition runs
        assert_eq!(waiting.status, RoomStatus::Waiting);

        let room = snapshot(&state, &code).await.unwrap();
        assert_eq!(room.status, RoomStatus::Playing);
        assert_eq!(room.current_round, 1);
        assert_eq!(room.rounds.len(), 1);
        assert_eq!(room.phase(), Some(RoundPhase::Category));
    }
}
