//! `QuestionCreate`, `QuestionUpdate` and `QuestionDelete`.

use std::sync::Arc;

use async_trait::async_trait;
use collab_core::protocol::{
    EditKind, QuestionCreatePayload, QuestionDeletePayload, QuestionUpdatePayload, now_rfc3339,
};
use collab_core::{Envelope, HubError};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use super::{decode, require_room, requested_form};
use crate::adapters::{IntegrationEvent, QuestionEdit};
use crate::dispatch::context::HubContext;
use crate::dispatch::registry::EventHandler;
use crate::websocket::Connection;

enum EditPayload {
    Create(QuestionCreatePayload),
    Update(QuestionUpdatePayload),
    Delete(QuestionDeletePayload),
}

impl EditPayload {
    fn decode(kind: EditKind, envelope: &Envelope) -> Result<Self, HubError> {
        let payload = match kind {
            EditKind::Create => Self::Create(decode(envelope)?),
            EditKind::Update => Self::Update(decode(envelope)?),
            EditKind::Delete => Self::Delete(decode(envelope)?),
        };
        if payload.question_id().trim().is_empty() {
            return Err(HubError::decode(
                envelope.event_type.clone(),
                &"question id must not be empty",
            ));
        }
        Ok(payload)
    }

    fn form_id(&self) -> Option<String> {
        match self {
            Self::Create(p) => p.form_id.clone(),
            Self::Update(p) => p.form_id.clone(),
            Self::Delete(p) => p.form_id.clone(),
        }
    }

    fn set_form_id(&mut self, form_id: &str) {
        let slot = match self {
            Self::Create(p) => &mut p.form_id,
            Self::Update(p) => &mut p.form_id,
            Self::Delete(p) => &mut p.form_id,
        };
        *slot = Some(form_id.to_owned());
    }

    fn question_id(&self) -> &str {
        match self {
            Self::Create(p) => &p.question.id,
            Self::Update(p) => &p.question_id,
            Self::Delete(p) => &p.question_id,
        }
    }

    /// What the edit record stores as `changes`.
    fn changes(&self) -> Value {
        match self {
            Self::Create(p) => serde_json::to_value(&p.question).unwrap_or_else(|_| json!({})),
            Self::Update(p) => Value::Object(p.changes.clone()),
            Self::Delete(_) => json!({}),
        }
    }

    fn version(&self) -> i64 {
        match self {
            Self::Update(p) => p.version,
            Self::Create(_) | Self::Delete(_) => 0,
        }
    }

    fn to_value(&self) -> Value {
        let value = match self {
            Self::Create(p) => serde_json::to_value(p),
            Self::Update(p) => serde_json::to_value(p),
            Self::Delete(p) => serde_json::to_value(p),
        };
        value.unwrap_or_else(|_| json!({}))
    }
}

/// Requires edit capability and membership of the target room. The edit is
/// broadcast to every member, the sender included, and published once as an
/// integration event. The client `version` is recorded but never compared:
/// concurrent edits are broadcast in whatever order they arrive.
pub struct QuestionEditHandler {
    kind: EditKind,
}

impl QuestionEditHandler {
    /// Handler for one edit kind.
    pub fn new(kind: EditKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl EventHandler for QuestionEditHandler {
    #[instrument(skip_all, fields(kind = self.kind.as_str(), connection_id = %connection.id))]
    async fn handle(
        &self,
        ctx: &HubContext,
        connection: &Arc<Connection>,
        envelope: Envelope,
    ) -> Result<(), HubError> {
        let mut payload = EditPayload::decode(self.kind, &envelope)?;
        let form_id = require_room(connection, requested_form(payload.form_id(), &envelope))?;

        let identity = connection.identity();
        if !ctx.gate.can_edit_form(identity, &form_id).await {
            return Err(HubError::Forbidden {
                capability: "edit",
                form_id,
            });
        }

        payload.set_form_id(&form_id);
        let data = payload.to_value();
        let user_id = identity.user_id.as_str();

        let edit = QuestionEdit {
            question_id: payload.question_id().to_owned(),
            form_id: form_id.clone(),
            user_id: user_id.to_owned(),
            kind: self.kind,
            changes: payload.changes(),
            version: payload.version(),
            timestamp: now_rfc3339(),
        };
        if let Err(error) = ctx.store.save_question_edit(edit).await {
            warn!(%form_id, user_id, %error, "failed to record question edit");
        }

        let broadcast = Envelope::new(self.kind.event_type(), Some(&form_id), data.clone())
            .from_sender(user_id);
        let report = ctx.rooms.broadcast(&form_id, &broadcast).await;
        debug!(
            %form_id,
            question_id = payload.question_id(),
            delivered = report.delivered,
            dropped = report.dropped,
            "question edit broadcast"
        );

        ctx.publisher
            .publish(IntegrationEvent::question(self.kind, &form_id, user_id, data));
        Ok(())
    }
}
