//! Handler registration table and dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use collab_core::{Envelope, EventType, HubError};
use metrics::{counter, histogram};
use tracing::{debug, error, warn};

use crate::dispatch::context::HubContext;
use crate::dispatch::handlers;
use crate::metrics as names;
use crate::websocket::Connection;

/// Default upper bound on a single handler invocation.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(10);

/// Implemented once per inbound event type.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one envelope from `connection`. Errors are reported to the
    /// sender by the dispatcher.
    async fn handle(
        &self,
        ctx: &HubContext,
        connection: &Arc<Connection>,
        envelope: Envelope,
    ) -> Result<(), HubError>;
}

/// Routes envelopes to the handler registered for their type.
pub struct Dispatcher {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
    handler_timeout: Duration,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new(handler_timeout: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            handler_timeout,
        }
    }

    /// Dispatcher with every built-in handler registered.
    pub fn with_default_handlers(handler_timeout: Duration) -> Self {
        let mut dispatcher = Self::new(handler_timeout);
        handlers::register_all(&mut dispatcher);
        dispatcher
    }

    /// Register a handler, replacing any previous one for `event_type`.
    pub fn register(&mut self, event_type: EventType, handler: impl EventHandler + 'static) {
        let _ = self.handlers.insert(event_type, Arc::new(handler));
    }

    /// Whether a handler is registered for `event_type`.
    pub fn has_handler(&self, event_type: EventType) -> bool {
        self.handlers.contains_key(&event_type)
    }

    /// Registered event types, sorted.
    pub fn event_types(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }

    /// Route one envelope. Unknown or unregistered types yield
    /// [`HubError::UnknownEvent`] without touching any state.
    pub async fn dispatch(
        &self,
        ctx: &HubContext,
        connection: &Arc<Connection>,
        envelope: Envelope,
    ) -> Result<(), HubError> {
        let Some((event_type, handler)) = envelope
            .kind()
            .and_then(|kind| self.handlers.get(&kind).map(|h| (kind, h)))
        else {
            counter!(names::HUB_EVENTS_TOTAL, "type" => "unknown").increment(1);
            return Err(HubError::UnknownEvent(envelope.event_type));
        };
        counter!(names::HUB_EVENTS_TOTAL, "type" => event_type.as_str()).increment(1);

        let start = std::time::Instant::now();
        let result = tokio::time::timeout(
            self.handler_timeout,
            handler.handle(ctx, connection, envelope),
        )
        .await;

        let result = result.unwrap_or_else(|_elapsed| {
            error!(
                event_type = %event_type,
                connection_id = %connection.id,
                "event handler timed out after {:?}",
                self.handler_timeout
            );
            Err(HubError::Internal {
                message: format!("handler for '{event_type}' timed out"),
            })
        });

        histogram!(names::HUB_EVENT_DURATION_SECONDS, "type" => event_type.as_str())
            .record(start.elapsed().as_secs_f64());
        result
    }

    /// Decode a text frame, dispatch it and reply to the sender on error.
    pub async fn handle_frame(&self, ctx: &HubContext, connection: &Arc<Connection>, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                report_error(connection, "envelope", None, &HubError::decode("envelope", &err));
                return;
            }
        };

        let event_type = envelope.event_type.clone();
        let form_id = envelope.form_id.clone();
        if let Err(err) = self.dispatch(ctx, connection, envelope).await {
            report_error(connection, &event_type, form_id.as_deref(), &err);
        }
    }
}

/// Log an error and send it to the originating connection only.
pub fn report_error(
    connection: &Connection,
    event_type: &str,
    form_id: Option<&str>,
    err: &HubError,
) {
    let code = err.code();
    let label = EventType::parse(event_type).map_or("unknown", EventType::as_str);
    counter!(names::HUB_ERRORS_TOTAL, "type" => label, "code" => code).increment(1);

    if err.is_security_relevant() {
        warn!(
            security = true,
            connection_id = %connection.id,
            user_id = %connection.user_id(),
            event_type,
            form_id,
            code,
            "{err}"
        );
    } else {
        debug!(
            connection_id = %connection.id,
            event_type,
            form_id,
            code,
            "{err}"
        );
    }

    let _ = connection.send_envelope(&err.to_error_envelope(form_id));
}
