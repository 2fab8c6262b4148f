use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{room_store::RoomStore, storage::StorageError},
    state::SharedState,
};

const FIRST_BACKOFF: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(10);
const POLL_EVERY: Duration = Duration::from_secs(5);
const RECONNECT_TRIES: u32 = 3;

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(BACKOFF_CAP)
}

/// Connect to the room store and keep the shared state in degraded mode while it is unreachable.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RoomStore>, StorageError>> + Send,
{
    let mut backoff = FIRST_BACKOFF;

    loop {
        let store = match connect().await {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, retry_in = ?backoff, "room store unreachable");
                sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };

        state.set_room_store(store.clone()).await;
        info!("room store connected; accepting room traffic");
        backoff = FIRST_BACKOFF;

        watch_store(&state, store.as_ref()).await;

        // the store gave up; drop it and start connecting from scratch
        state.clear_room_store().await;
        sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

/// Poll the store until it fails and cannot be reconnected.
async fn watch_store(state: &SharedState, store: &dyn RoomStore) {
    loop {
        let healthy = store.health_check().await.is_ok() || reconnect(state, store).await;
        if !healthy {
            warn!(tries = RECONNECT_TRIES, "room store lost; serving in degraded mode");
            return;
        }
        if state.is_degraded().await {
            info!("room store recovered");
            state.update_degraded(false).await;
        }
        sleep(POLL_EVERY).await;
    }
}

/// Try to reopen a store whose health check failed, degrading on the first failure.
async fn reconnect(state: &SharedState, store: &dyn RoomStore) -> bool {
    let mut backoff = FIRST_BACKOFF;
    for attempt in 1..=RECONNECT_TRIES {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "room store reconnected");
                return true;
            }
            Err(err) => {
                if attempt == 1 {
                    state.update_degraded(true).await;
                }
                warn!(attempt, error = %err, "room store reconnect failed");
                sleep(backoff).await;
                backoff = next_backoff(backoff);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::{config::AppConfig, dao::room_store::memory::MemoryRoomStore, state::AppState};

    #[tokio::test(start_paused = true)]
    async fn retries_until_the_store_connects() {
        let state = AppState::new(AppConfig::default());
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let supervisor = tokio::spawn(run(state.clone(), move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(StorageError::unavailable(
                        "not yet".into(),
                        std::io::Error::other("refused"),
                    ))
                } else {
                    Ok(Arc::new(MemoryRoomStore::new()) as Arc<dyn RoomStore>)
                }
            }
        }));

        sleep(Duration::from_millis(500)).await;
        assert!(state.is_degraded().await);

        sleep(Duration::from_secs(4)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(!state.is_degraded().await);
        supervisor.abort();
    }
}
