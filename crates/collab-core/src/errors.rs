//! Hub error taxonomy and wire codes.
//!
//! Every variant is scoped to one connection and one event; none of them
//! close the connection. Errors are reported to the sender as an `Error`
//! envelope carrying `{code, message, details?}`.

use serde_json::{Value, json};

use crate::protocol::{Envelope, ErrorPayload, EventType};

// ── Error code constants ────────────────────────────────────────────

/// Envelope or payload did not decode.
pub const DECODE_ERROR: &str = "DECODE_ERROR";
/// No handler registered for the event type.
pub const UNKNOWN_EVENT: &str = "UNKNOWN_EVENT";
/// Event references a room the connection has not joined.
pub const NOT_JOINED: &str = "NOT_JOINED";
/// No form given and the connection has no current room.
pub const NO_ACTIVE_ROOM: &str = "NO_ACTIVE_ROOM";
/// Capability check denied.
pub const FORBIDDEN: &str = "FORBIDDEN";
/// Room is at its user limit.
pub const ROOM_FULL: &str = "ROOM_FULL";
/// Connection exceeded its inbound message budget.
pub const RATE_LIMITED: &str = "RATE_LIMITED";
/// Unexpected failure, including handler timeouts.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Error returned by event handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// Malformed envelope or payload.
    #[error("malformed {event} payload: {message}")]
    Decode {
        /// Event type (or `envelope`).
        event: String,
        /// Decoder message.
        message: String,
    },

    /// Unregistered event type.
    #[error("unknown event type '{0}'")]
    UnknownEvent(String),

    /// Referenced room is not the connection's current room.
    #[error("not joined to form '{form_id}'")]
    NotJoined {
        /// The referenced form.
        form_id: String,
    },

    /// Nothing to act on.
    #[error("no active room")]
    NoActiveRoom,

    /// Capability denied by the permission gate.
    #[error("{capability} access to form '{form_id}' denied")]
    Forbidden {
        /// Capability that was required (`view` or `edit`).
        capability: &'static str,
        /// Form the check ran against.
        form_id: String,
    },

    /// Room already holds the maximum number of distinct users.
    #[error("form '{form_id}' already has {limit} users")]
    RoomFull {
        /// Full room.
        form_id: String,
        /// Configured limit.
        limit: usize,
    },

    /// Inbound rate limit exceeded.
    #[error("rate limit exceeded, slow down")]
    RateLimited,

    /// Internal failure.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl HubError {
    /// Decode failure for `event`.
    pub fn decode(event: impl Into<String>, err: &impl std::fmt::Display) -> Self {
        Self::Decode {
            event: event.into(),
            message: err.to_string(),
        }
    }

    /// Machine-readable code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode { .. } => DECODE_ERROR,
            Self::UnknownEvent(_) => UNKNOWN_EVENT,
            Self::NotJoined { .. } => NOT_JOINED,
            Self::NoActiveRoom => NO_ACTIVE_ROOM,
            Self::Forbidden { .. } => FORBIDDEN,
            Self::RoomFull { .. } => ROOM_FULL,
            Self::RateLimited => RATE_LIMITED,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Whether this error should be recorded as a security event.
    pub fn is_security_relevant(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::Decode { event, .. } | Self::UnknownEvent(event) => {
                Some(json!({ "event": event }))
            }
            Self::Forbidden { capability, .. } => Some(json!({ "required": capability })),
            Self::RoomFull { limit, .. } => Some(json!({ "limit": limit })),
            _ => None,
        }
    }

    /// Wire body.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_owned(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    /// `Error` envelope addressed to the sender.
    pub fn to_error_envelope(&self, form_id: Option<&str>) -> Envelope {
        Envelope::with_payload(EventType::Error, form_id, &self.to_payload())
    }
}
