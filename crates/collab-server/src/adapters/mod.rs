//! Outbound collaborator interfaces and their default implementations.

pub mod permission;
pub mod publisher;
pub mod session_store;

pub use permission::{ClaimsPermissionGate, PermissionGate};
pub use publisher::{
    EventPublisher, EventSink, IntegrationEvent, LogSink, PublishError, QueuedPublisher,
    WebhookSink,
};
pub use session_store::{
    CursorState, InMemorySessionStore, QuestionEdit, SessionStore, StoreError, StoreTtls,
    UserSession,
};
