//! `CursorUpdate`: share a pointer position with the rest of the room.

use std::sync::Arc;

use async_trait::async_trait;
use collab_core::protocol::{CursorBroadcast, CursorUpdatePayload, now_rfc3339};
use collab_core::{Envelope, EventType, HubError};
use tracing::warn;

use super::{decode, require_room, requested_form};
use crate::adapters::CursorState;
use crate::dispatch::context::HubContext;
use crate::dispatch::registry::EventHandler;
use crate::websocket::Connection;

/// The form must be the connection's current room. View capability was
/// checked at join time and is not re-checked per move. The sender never
/// receives its own cursor.
pub struct CursorUpdateHandler;

#[async_trait]
impl EventHandler for CursorUpdateHandler {
    async fn handle(
        &self,
        ctx: &HubContext,
        connection: &Arc<Connection>,
        envelope: Envelope,
    ) -> Result<(), HubError> {
        let payload: CursorUpdatePayload = decode(&envelope)?;
        let form_id = require_room(connection, requested_form(payload.form_id, &envelope))?;
        let user_id = connection.user_id();
        let last_updated = now_rfc3339();

        let cursor = CursorState {
            form_id: form_id.clone(),
            user_id: user_id.to_owned(),
            position: payload.position.clone(),
            last_updated: last_updated.clone(),
        };
        if let Err(error) = ctx.store.update_cursor(cursor).await {
            warn!(%form_id, user_id, %error, "failed to store cursor");
        }

        let broadcast = Envelope::with_payload(
            EventType::CursorUpdate,
            Some(&form_id),
            &CursorBroadcast {
                form_id: form_id.clone(),
                user_id: user_id.to_owned(),
                position: payload.position,
                last_updated,
            },
        )
        .from_sender(user_id);
        let _ = ctx.rooms.broadcast_except(&form_id, user_id, &broadcast).await;
        Ok(())
    }
}
