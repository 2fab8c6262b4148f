use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;

use crate::dao::{
    models::RoomEntity,
    room_store::RoomStore,
    storage::{StorageError, StorageResult},
};

/// Process-local room store used when no database is configured and in tests.
#[derive(Clone, Default)]
pub struct MemoryRoomStore {
    rooms: Arc<DashMap<String, RoomEntity>>,
}

impl MemoryRoomStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether the store holds no room at all.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn insert(&self, room: RoomEntity) -> StorageResult<()> {
        match self.rooms.entry(room.code.clone()) {
            Entry::Occupied(_) => Err(StorageError::conflict(room.code)),
            Entry::Vacant(slot) => {
                slot.insert(room);
                Ok(())
            }
        }
    }

    fn update(&self, room: RoomEntity, expected_version: u64) -> StorageResult<()> {
        match self.rooms.get_mut(&room.code) {
            Some(mut stored) if stored.version == expected_version => {
                *stored = room;
                Ok(())
            }
            _ => Err(StorageError::conflict(room.code)),
        }
    }
}

impl RoomStore for MemoryRoomStore {
    fn insert_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.insert(room);
        Box::pin(async move { result })
    }

    fn update_room(
        &self,
        room: RoomEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.update(room, expected_version);
        Box::pin(async move { result })
    }

    fn find_room(&self, code: String) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let room = self.rooms.get(&code).map(|entry| entry.value().clone());
        Box::pin(async move { Ok(room) })
    }

    fn room_exists(&self, code: String) -> BoxFuture<'static, StorageResult<bool>> {
        let exists = self.rooms.contains_key(&code);
        Box::pin(async move { Ok(exists) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
