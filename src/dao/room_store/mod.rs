pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::RoomEntity;
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;

/// Abstraction over the persistence layer holding one document per room.
///
/// Writes are version-checked: `update_room` only succeeds when the stored
/// document still carries `expected_version`, otherwise it fails with
/// [`StorageError::Conflict`](crate::dao::storage::StorageError::Conflict).
pub trait RoomStore: Send + Sync {
    /// Persist a brand-new room; fails with a conflict when the code is taken.
    fn insert_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Replace an existing room if its stored version equals `expected_version`.
    fn update_room(
        &self,
        room: RoomEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Load a room by code.
    fn find_room(&self, code: String) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    /// Whether a room with this code is already stored.
    fn room_exists(&self, code: String) -> BoxFuture<'static, StorageResult<bool>>;
    /// Cheap liveness probe.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
