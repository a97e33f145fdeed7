//! `Ping`: client heartbeat.

use std::sync::Arc;

use async_trait::async_trait;
use collab_core::protocol::{PongPayload, now_rfc3339};
use collab_core::{Envelope, EventType, HubError};

use crate::dispatch::context::HubContext;
use crate::dispatch::registry::EventHandler;
use crate::websocket::Connection;

/// Refreshes the heartbeat and answers the sender with `Pong`.
pub struct PingHandler;

#[async_trait]
impl EventHandler for PingHandler {
    async fn handle(
        &self,
        _ctx: &HubContext,
        connection: &Arc<Connection>,
        envelope: Envelope,
    ) -> Result<(), HubError> {
        connection.touch_heartbeat();
        let pong = Envelope::with_payload(
            EventType::Pong,
            envelope.form_id.as_deref(),
            &PongPayload {
                timestamp: now_rfc3339(),
            },
        );
        let _ = connection.send_envelope(&pong);
        Ok(())
    }
}
