//! The envelope wrapping every inbound request and outbound broadcast.

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::events::EventType;

/// Current UTC time as RFC3339 with millisecond precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn empty_payload() -> Value {
    Value::Object(Map::new())
}

/// `{type, formId?, payload, senderId?, timestamp}`.
///
/// The type is kept as the raw string so that frames with an unrecognized
/// type still decode and can be answered with `UNKNOWN_EVENT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Event type string (see [`EventType`]).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Form the event refers to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    /// Event-specific body.
    #[serde(default = "empty_payload")]
    pub payload: Value,
    /// User whose action produced this envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    /// RFC3339 timestamp.
    #[serde(default = "now_rfc3339")]
    pub timestamp: String,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(event_type: EventType, form_id: Option<&str>, payload: Value) -> Self {
        Self {
            event_type: event_type.as_str().to_owned(),
            form_id: form_id.map(str::to_owned),
            payload,
            sender_id: None,
            timestamp: now_rfc3339(),
        }
    }

    /// Build an envelope from a typed payload.
    ///
    /// Payload types in this crate always serialize to an object; anything
    /// that fails to serialize is replaced by an empty object.
    pub fn with_payload<T: Serialize>(
        event_type: EventType,
        form_id: Option<&str>,
        payload: &T,
    ) -> Self {
        let value = serde_json::to_value(payload).unwrap_or_else(|_| empty_payload());
        Self::new(event_type, form_id, value)
    }

    /// Attach the originating user.
    #[must_use]
    pub fn from_sender(mut self, user_id: &str) -> Self {
        self.sender_id = Some(user_id.to_owned());
        self
    }

    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Recognized event type, or `None` for an unknown type string.
    pub fn kind(&self) -> Option<EventType> {
        EventType::parse(&self.event_type)
    }

    /// Decode the payload into a typed struct.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}
