pub mod registry;
pub mod room;
pub mod scoring;
mod sse;
pub mod state_machine;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, watch};
use tracing::info;

use crate::{
    config::AppConfig, dao::room_store::RoomStore, error::ServiceError,
    services::room_actor::RoomHandle,
};

pub use self::registry::{ConnectionId, ConnectionRegistry, Seat};
pub use self::state_machine::{ApplyError, Plan, PlanError, PlanId, RoomStateMachine};

pub type SharedState = Arc<AppState>;

/// Central application state: configuration, storage handle, live rooms and connections.
pub struct AppState {
    config: Arc<AppConfig>,
    room_store: RwLock<Option<Arc<dyn RoomStore>>>,
    degraded: watch::Sender<bool>,
    rooms: DashMap<String, RoomHandle>,
    connections: ConnectionRegistry,
    machine: RoomStateMachine,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let machine = RoomStateMachine::new(config.timings.clone());
        Arc::new(Self {
            config: Arc::new(config),
            room_store: RwLock::new(None),
            degraded: degraded_tx,
            rooms: DashMap::new(),
            connections: ConnectionRegistry::new(),
            machine,
        })
    }

    /// Shared configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Phase state machine configured with the game timings.
    pub fn machine(&self) -> &RoomStateMachine {
        &self.machine
    }

    /// Registry of live player connections.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Handles of the room actors currently running, keyed by room code.
    pub fn rooms(&self) -> &DashMap<String, RoomHandle> {
        &self.rooms
    }

    /// Obtain a handle to the current room store, if one is installed.
    pub async fn room_store(&self) -> Option<Arc<dyn RoomStore>> {
        let guard = self.room_store.read().await;
        guard.as_ref().cloned()
    }

    /// Room store or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_room_store(&self) -> Result<Arc<dyn RoomStore>, ServiceError> {
        self.room_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new room store implementation and leave degraded mode.
    pub async fn set_room_store(&self, store: Arc<dyn RoomStore>) {
        {
            let mut guard = self.room_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current room store and enter degraded mode.
    pub async fn clear_room_store(&self) {
        {
            let mut guard = self.room_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow() || self.room_store.read().await.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Stop every room actor and close all connections.
    pub fn shutdown(&self) {
        let handles: Vec<RoomHandle> = self.rooms.iter().map(|h| h.value().clone()).collect();
        self.rooms.clear();
        for handle in &handles {
            handle.shutdown();
        }
        self.connections.clear();
        info!(rooms = handles.len(), "application state torn down");
    }
}
