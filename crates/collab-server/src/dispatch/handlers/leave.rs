//! `LeaveForm`: exit the current room.

use std::sync::Arc;

use async_trait::async_trait;
use collab_core::protocol::{LeaveFormPayload, LeaveFormResponse, UserLeftPayload};
use collab_core::{Envelope, EventType, HubError};
use tracing::{info, instrument, warn};

use super::{decode, requested_form};
use crate::dispatch::context::HubContext;
use crate::dispatch::registry::EventHandler;
use crate::websocket::Connection;
use crate::websocket::rooms::LeaveOutcome;

/// No capability needed. The form defaults to the connection's current
/// room; naming any other form is `NOT_JOINED`.
pub struct LeaveFormHandler;

#[async_trait]
impl EventHandler for LeaveFormHandler {
    #[instrument(skip_all, fields(event = "LeaveForm", connection_id = %connection.id))]
    async fn handle(
        &self,
        ctx: &HubContext,
        connection: &Arc<Connection>,
        envelope: Envelope,
    ) -> Result<(), HubError> {
        let payload: LeaveFormPayload = decode(&envelope)?;
        let current = connection.current_room().ok_or(HubError::NoActiveRoom)?;
        if let Some(form_id) = requested_form(payload.form_id, &envelope) {
            if form_id != current {
                return Err(HubError::NotJoined { form_id });
            }
        }

        let _ = depart(ctx, connection, &current).await;

        let response = LeaveFormResponse {
            form_id: current.clone(),
            user_id: connection.user_id().to_owned(),
            success: true,
        };
        let _ = connection.send_envelope(&Envelope::with_payload(
            EventType::LeaveFormResponse,
            Some(&current),
            &response,
        ));
        Ok(())
    }
}

/// Remove `connection` from `form_id` and clean up after it.
///
/// When this was the user's last connection in the room the remaining
/// members get `UserLeft` and the user's session and cursor records are
/// deleted. Store failures are logged only. Shared by `LeaveForm`, room
/// switches and connection teardown.
pub(crate) async fn depart(
    ctx: &HubContext,
    connection: &Connection,
    form_id: &str,
) -> LeaveOutcome {
    let outcome = ctx.rooms.leave_room(form_id, connection).await;
    let _ = connection.clear_room(form_id);

    if outcome.user_gone {
        let user_id = connection.user_id();
        let notice = Envelope::with_payload(
            EventType::UserLeft,
            Some(form_id),
            &UserLeftPayload {
                form_id: form_id.to_owned(),
                user_id: user_id.to_owned(),
            },
        )
        .from_sender(user_id);
        let _ = ctx.rooms.broadcast_except(form_id, user_id, &notice).await;

        if let Err(error) = ctx.store.remove_user_session(user_id, form_id).await {
            warn!(form_id, user_id, %error, "failed to remove user session");
        }
        if let Err(error) = ctx.store.remove_cursor(form_id, user_id).await {
            warn!(form_id, user_id, %error, "failed to remove cursor");
        }
        info!(form_id, user_id, room_removed = outcome.room_removed, "user left form");
    }
    outcome
}
