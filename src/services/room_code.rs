use rand::Rng;
use tracing::warn;

use crate::{dao::room_store::RoomStore, error::ServiceError};

/// Characters a room code is drawn from; `0`, `O`, `1` and `I` are left out.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Length of a room code.
pub const CODE_LENGTH: usize = 6;
/// Attempts made before giving up on finding a free code.
pub const MAX_CODE_ATTEMPTS: usize = 32;

/// Draw a random code, without checking it is free.
pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Find a code that is not stored yet.
///
/// The check is advisory: the caller still inserts with conflict detection.
pub async fn unused_code(store: &dyn RoomStore) -> Result<String, ServiceError> {
    for attempt in 0..MAX_CODE_ATTEMPTS {
        let code = generate(&mut rand::rng());
        if !store.room_exists(code.clone()).await? {
            return Ok(code);
        }
        warn!(attempt, code = %code, "room code collision");
    }
    Err(ServiceError::InvalidState(
        "could not allocate a free room code".into(),
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        dao::room_store::memory::MemoryRoomStore,
        dto::validation::validate_room_code,
        state::room::Room,
    };

    #[test]
    fn codes_use_the_unambiguous_alphabet() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let code = generate(&mut rng);
            assert!(validate_room_code(&code).is_ok(), "bad code {code}");
        }
    }

    #[tokio::test]
    async fn unused_code_never_returns_a_stored_code() {
        let store = MemoryRoomStore::new();
        let mut rng = StdRng::seed_from_u64(42);
        let mut stored = HashSet::new();
        while stored.len() < 100 {
            let code = generate(&mut rng);
            if stored.insert(code.clone()) {
                let room = Room::new(code, "host".into(), "Host".into(), vec!["Openers".into()]);
                store.insert_room(room.into()).await.unwrap();
            }
        }

        for _ in 0..10_000 {
            let code = unused_code(&store).await.unwrap();
            assert!(!stored.contains(&code), "drew stored code {code}");
            assert!(validate_room_code(&code).is_ok());
        }
    }
}
