//! One handler per inbound event type.
//!
//! Every handler follows the same steps: decode the payload, check room
//! membership, check capability for mutations, record state in the session
//! store, broadcast, then hand off an integration event where applicable.
//! Store and publisher failures are logged and never undo a broadcast.

pub mod cursor;
pub mod join;
pub mod leave;
pub mod ping;
pub mod question;

use collab_core::protocol::EditKind;
use collab_core::{Envelope, EventType, HubError};
use serde::de::DeserializeOwned;

use crate::dispatch::registry::Dispatcher;
use crate::websocket::Connection;

/// Register every built-in handler.
pub fn register_all(dispatcher: &mut Dispatcher) {
    dispatcher.register(EventType::JoinForm, join::JoinFormHandler);
    dispatcher.register(EventType::LeaveForm, leave::LeaveFormHandler);
    dispatcher.register(EventType::CursorUpdate, cursor::CursorUpdateHandler);
    dispatcher.register(
        EventType::QuestionCreate,
        question::QuestionEditHandler::new(EditKind::Create),
    );
    dispatcher.register(
        EventType::QuestionUpdate,
        question::QuestionEditHandler::new(EditKind::Update),
    );
    dispatcher.register(
        EventType::QuestionDelete,
        question::QuestionEditHandler::new(EditKind::Delete),
    );
    dispatcher.register(EventType::Ping, ping::PingHandler);
}

/// Decode the envelope payload, mapping failures to `DECODE_ERROR`.
pub(crate) fn decode<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, HubError> {
    envelope
        .decode_payload()
        .map_err(|err| HubError::decode(envelope.event_type.clone(), &err))
}

/// First non-empty form id among the payload's and the envelope's.
pub(crate) fn requested_form(payload_form: Option<String>, envelope: &Envelope) -> Option<String> {
    payload_form
        .filter(|f| !f.is_empty())
        .or_else(|| envelope.form_id.clone().filter(|f| !f.is_empty()))
}

/// Resolve the room an event acts on.
///
/// The requested form must match the connection's current room. With no
/// form requested, the current room is used.
pub(crate) fn require_room(
    connection: &Connection,
    requested: Option<String>,
) -> Result<String, HubError> {
    match (requested, connection.current_room()) {
        (Some(form_id), Some(current)) if form_id == current => Ok(current),
        (Some(form_id), _) => Err(HubError::NotJoined { form_id }),
        (None, Some(current)) => Ok(current),
        (None, None) => Err(HubError::NoActiveRoom),
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::sync::Arc;

    use collab_core::UserIdentity;
    use parking_lot::Mutex;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use crate::adapters::{
        ClaimsPermissionGate, EventPublisher, InMemorySessionStore, IntegrationEvent,
        PermissionGate, SessionStore,
    };
    use crate::dispatch::HubContext;
    use crate::websocket::Connection;

    /// Publisher that keeps every event.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub events: Mutex<Vec<IntegrationEvent>>,
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, event: IntegrationEvent) {
            self.events.lock().push(event);
        }
    }

    pub struct TestHub {
        pub ctx: HubContext,
        pub store: Arc<InMemorySessionStore>,
        pub publisher: Arc<RecordingPublisher>,
    }

    pub fn make_hub_with(gate: Arc<dyn PermissionGate>, max_users: usize) -> TestHub {
        let store = Arc::new(InMemorySessionStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let ctx = HubContext::new(max_users, gate, store.clone(), publisher.clone());
        TestHub { ctx, store, publisher }
    }

    /// Context over an arbitrary store, for failure-path tests.
    pub fn make_context_with_store(
        store: Arc<dyn SessionStore>,
    ) -> (HubContext, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let ctx = HubContext::new(100, Arc::new(ClaimsPermissionGate), store, publisher.clone());
        (ctx, publisher)
    }

    pub fn make_hub() -> TestHub {
        make_hub_with(Arc::new(ClaimsPermissionGate), 100)
    }

    pub fn make_context() -> HubContext {
        make_hub().ctx
    }

    pub fn make_context_with_gate(gate: Arc<dyn PermissionGate>) -> HubContext {
        make_hub_with(gate, 100).ctx
    }

    pub fn identity(user_id: &str, role: &str, permissions: &[&str]) -> UserIdentity {
        UserIdentity {
            user_id: user_id.into(),
            email: format!("{user_id}@example.com"),
            name: user_id.to_uppercase(),
            role: role.into(),
            permissions: permissions.iter().map(|p| (*p).to_owned()).collect(),
            session_id: None,
        }
    }

    pub fn editor(user_id: &str) -> UserIdentity {
        identity(user_id, "editor", &["forms:edit"])
    }

    pub fn viewer(user_id: &str) -> UserIdentity {
        identity(user_id, "viewer", &["forms:view"])
    }

    pub fn make_connection(
        identity: UserIdentity,
    ) -> (Arc<Connection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(64);
        (Arc::new(Connection::new(identity, tx)), rx)
    }

    /// Everything currently in a mailbox, parsed.
    pub fn recv_all(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }
}
