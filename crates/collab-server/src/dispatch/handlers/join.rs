//! `JoinForm`: enter a form's room.

use std::sync::Arc;

use async_trait::async_trait;
use collab_core::protocol::{
    JoinFormPayload, JoinFormResponse, UserJoinedPayload, now_rfc3339,
};
use collab_core::{Envelope, EventType, HubError};
use tracing::{debug, info, instrument, warn};

use super::{decode, leave, requested_form};
use crate::adapters::UserSession;
use crate::dispatch::context::HubContext;
use crate::dispatch::registry::EventHandler;
use crate::websocket::Connection;

/// Requires view capability. A connection holds at most one room: joining a
/// different form first leaves the current one. Re-joining the current
/// form refreshes the roster without announcing the user again.
pub struct JoinFormHandler;

#[async_trait]
impl EventHandler for JoinFormHandler {
    #[instrument(skip_all, fields(event = "JoinForm", connection_id = %connection.id))]
    async fn handle(
        &self,
        ctx: &HubContext,
        connection: &Arc<Connection>,
        envelope: Envelope,
    ) -> Result<(), HubError> {
        let payload: JoinFormPayload = decode(&envelope)?;
        let form_id = requested_form(payload.form_id, &envelope)
            .or_else(|| connection.current_room())
            .ok_or(HubError::NoActiveRoom)?;

        let identity = connection.identity();
        if !ctx.gate.can_access_form(identity, &form_id).await {
            return Err(HubError::Forbidden {
                capability: "view",
                form_id,
            });
        }

        if let Some(previous) = connection.current_room().filter(|r| *r != form_id) {
            let _ = leave::depart(ctx, connection, &previous).await;
        }

        let outcome = ctx.rooms.join_room(&form_id, connection).await?;
        let _ = connection.set_current_room(&form_id);

        let session = UserSession {
            user_id: identity.user_id.clone(),
            form_id: form_id.clone(),
            joined_at: now_rfc3339(),
            client_id: connection.id.clone(),
            is_active: true,
        };
        if let Err(error) = ctx.store.save_user_session(session).await {
            warn!(%form_id, user_id = %identity.user_id, %error, "failed to save user session");
        }

        if connection.is_closed() {
            // Torn down mid-join. Teardown has already left the room, but the
            // session may have been saved after it cleaned up.
            if !ctx.rooms.has_user(&form_id, &identity.user_id).await {
                if let Err(error) = ctx.store.remove_user_session(&identity.user_id, &form_id).await {
                    warn!(%form_id, user_id = %identity.user_id, %error, "failed to remove user session");
                }
            }
            let _ = connection.clear_room(&form_id);
            debug!(%form_id, user_id = %identity.user_id, "connection closed during join");
            return Ok(());
        }

        let joined_user = outcome
            .roster
            .iter()
            .find(|u| u.user_id == identity.user_id)
            .cloned()
            .unwrap_or_else(|| identity.to_room_user());

        let response = JoinFormResponse {
            form_id: form_id.clone(),
            user_id: identity.user_id.clone(),
            success: true,
            room_users: outcome.roster,
            timestamp: now_rfc3339(),
        };
        let _ = connection.send_envelope(&Envelope::with_payload(
            EventType::JoinFormResponse,
            Some(&form_id),
            &response,
        ));

        if outcome.first_for_user {
            let announcement = Envelope::with_payload(
                EventType::UserJoined,
                Some(&form_id),
                &UserJoinedPayload {
                    form_id: form_id.clone(),
                    user: joined_user,
                },
            )
            .from_sender(&identity.user_id);
            let _ = ctx
                .rooms
                .broadcast_except(&form_id, &identity.user_id, &announcement)
                .await;
            info!(%form_id, user_id = %identity.user_id, "user joined form");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SessionStore;
    use crate::dispatch::handlers::test_helpers::{
        editor, identity, make_connection, make_hub, make_hub_with, recv_all, viewer,
    };
    use crate::adapters::ClaimsPermissionGate;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn join(form_id: &str) -> Envelope {
        Envelope::new(EventType::JoinForm, Some(form_id), json!({}))
    }

    #[tokio::test]
    async fn first_join_gets_roster_of_one() {
        let hub = make_hub();
        let (a, mut ra) = make_connection(editor("alice"));
        JoinFormHandler.handle(&hub.ctx, &a, join("f1")).await.unwrap();

        let msgs = recv_all(&mut ra);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["type"], "JoinFormResponse");
        assert_eq!(msgs[0]["payload"]["success"], true);
        assert_eq!(msgs[0]["payload"]["roomUsers"][0]["userId"], "alice");
        assert_eq!(a.current_room().as_deref(), Some("f1"));
        assert!(hub.store.user_session("alice", "f1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_join_announces_to_others() {
        let hub = make_hub();
        let (a, mut ra) = make_connection(editor("alice"));
        let (b, mut rb) = make_connection(viewer("bob"));
        JoinFormHandler.handle(&hub.ctx, &a, join("f1")).await.unwrap();
        let _ = recv_all(&mut ra);
        JoinFormHandler.handle(&hub.ctx, &b, join("f1")).await.unwrap();

        let to_a = recv_all(&mut ra);
        assert_eq!(to_a.len(), 1);
        assert_eq!(to_a[0]["type"], "UserJoined");
        assert_eq!(to_a[0]["payload"]["user"]["userId"], "bob");

        let to_b = recv_all(&mut rb);
        assert_eq!(to_b.len(), 1);
        let users: Vec<_> = to_b[0]["payload"]["roomUsers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["userId"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(users, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn form_id_from_payload() {
        let hub = make_hub();
        let (a, _ra) = make_connection(editor("alice"));
        let env = Envelope::new(EventType::JoinForm, None, json!({"formId": "f7"}));
        JoinFormHandler.handle(&hub.ctx, &a, env).await.unwrap();
        assert_eq!(a.current_room().as_deref(), Some("f7"));
    }

    #[tokio::test]
    async fn no_form_and_no_room_is_rejected() {
        let hub = make_hub();
        let (a, mut ra) = make_connection(editor("alice"));
        let env = Envelope::new(EventType::JoinForm, None, json!({}));
        let err = JoinFormHandler.handle(&hub.ctx, &a, env).await.unwrap_err();
        assert_eq!(err, HubError::NoActiveRoom);
        assert!(recv_all(&mut ra).is_empty());
    }

    #[tokio::test]
    async fn no_form_rejoins_current_room() {
        let hub = make_hub();
        let (a, mut ra) = make_connection(editor("alice"));
        JoinFormHandler.handle(&hub.ctx, &a, join("f1")).await.unwrap();
        let env = Envelope::new(EventType::JoinForm, None, json!({}));
        JoinFormHandler.handle(&hub.ctx, &a, env).await.unwrap();
        let msgs = recv_all(&mut ra);
        assert_eq!(msgs.len(), 2);
        assert_eq!(hub.ctx.rooms.connection_count("f1").await, 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_decode_error() {
        let hub = make_hub();
        let (a, _ra) = make_connection(editor("alice"));
        let env = Envelope::new(EventType::JoinForm, None, json!({"formId": 42}));
        let err = JoinFormHandler.handle(&hub.ctx, &a, env).await.unwrap_err();
        assert_matches!(err, HubError::Decode { .. });
    }

    #[tokio::test]
    async fn without_view_capability_is_forbidden() {
        let hub = make_hub();
        let (c, _rc) = make_connection(identity("carol", "member", &["form:other:view"]));
        let err = JoinFormHandler.handle(&hub.ctx, &c, join("f1")).await.unwrap_err();
        assert_matches!(err, HubError::Forbidden { capability: "view", .. });
        assert!(c.current_room().is_none());
        assert_eq!(hub.ctx.rooms.room_count().await, 0);
    }

    #[tokio::test]
    async fn switching_rooms_leaves_the_old_one() {
        let hub = make_hub();
        let (a, _ra) = make_connection(editor("alice"));
        let (b, mut rb) = make_connection(editor("bob"));
        JoinFormHandler.handle(&hub.ctx, &a, join("f1")).await.unwrap();
        JoinFormHandler.handle(&hub.ctx, &b, join("f1")).await.unwrap();
        let _ = recv_all(&mut rb);

        JoinFormHandler.handle(&hub.ctx, &a, join("f2")).await.unwrap();

        assert_eq!(a.current_room().as_deref(), Some("f2"));
        assert!(!hub.ctx.rooms.is_member("f1", &a.id).await);
        let to_b = recv_all(&mut rb);
        assert_eq!(to_b[0]["type"], "UserLeft");
        assert_eq!(to_b[0]["payload"]["userId"], "alice");
        assert!(hub.store.user_session("alice", "f1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_tab_is_not_announced() {
        let hub = make_hub();
        let (a1, _r1) = make_connection(editor("alice"));
        let (a2, _r2) = make_connection(editor("alice"));
        let (b, mut rb) = make_connection(editor("bob"));
        JoinFormHandler.handle(&hub.ctx, &b, join("f1")).await.unwrap();
        JoinFormHandler.handle(&hub.ctx, &a1, join("f1")).await.unwrap();
        JoinFormHandler.handle(&hub.ctx, &a2, join("f1")).await.unwrap();

        let joined: Vec<_> = recv_all(&mut rb)
            .into_iter()
            .filter(|m| m["type"] == "UserJoined")
            .collect();
        assert_eq!(joined.len(), 1);
    }

    #[tokio::test]
    async fn full_room_rejects_join() {
        let hub = make_hub_with(std::sync::Arc::new(ClaimsPermissionGate), 1);
        let (a, _ra) = make_connection(editor("alice"));
        let (b, _rb) = make_connection(editor("bob"));
        JoinFormHandler.handle(&hub.ctx, &a, join("f1")).await.unwrap();
        let err = JoinFormHandler.handle(&hub.ctx, &b, join("f1")).await.unwrap_err();
        assert_matches!(err, HubError::RoomFull { limit: 1, .. });
        assert!(b.current_room().is_none());
    }
}
