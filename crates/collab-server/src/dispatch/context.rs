//! Shared state handed to every event handler.

use std::sync::Arc;

use crate::adapters::{EventPublisher, PermissionGate, SessionStore};
use crate::websocket::{ConnectionRegistry, RoomRegistry};

/// Everything a handler can touch.
#[derive(Clone)]
pub struct HubContext {
    /// Room membership and fan-out.
    pub rooms: Arc<RoomRegistry>,
    /// Every live connection.
    pub connections: Arc<ConnectionRegistry>,
    /// Capability checks.
    pub gate: Arc<dyn PermissionGate>,
    /// Ephemeral presence, cursor and edit records.
    pub store: Arc<dyn SessionStore>,
    /// Integration event hand-off.
    pub publisher: Arc<dyn EventPublisher>,
}

impl HubContext {
    /// Build a context with empty registries.
    pub fn new(
        max_users_per_room: usize,
        gate: Arc<dyn PermissionGate>,
        store: Arc<dyn SessionStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            rooms: Arc::new(RoomRegistry::new(max_users_per_room)),
            connections: Arc::new(ConnectionRegistry::new()),
            gate,
            store,
            publisher,
        }
    }
}
