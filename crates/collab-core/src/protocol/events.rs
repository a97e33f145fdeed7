//! Event type names carried in the envelope `type` field.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Every event type the hub sends or accepts.
///
/// Cursor and question events use the same name inbound and outbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    /// Server greeting sent once per connection.
    ConnectionEstablished,
    /// Client asks to join a form's room.
    JoinForm,
    /// Reply to the joining connection with the room roster.
    JoinFormResponse,
    /// Client asks to leave its current room.
    LeaveForm,
    /// Reply to the leaving connection.
    LeaveFormResponse,
    /// Another user entered the room.
    UserJoined,
    /// A user left the room.
    UserLeft,
    /// Cursor position update.
    CursorUpdate,
    /// A question was added to the form.
    QuestionCreate,
    /// A question was changed.
    QuestionUpdate,
    /// A question was removed.
    QuestionDelete,
    /// Client heartbeat.
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Error reply to the sender.
    Error,
}

impl EventType {
    /// All variants, in declaration order.
    pub const ALL: [Self; 14] = [
        Self::ConnectionEstablished,
        Self::JoinForm,
        Self::JoinFormResponse,
        Self::LeaveForm,
        Self::LeaveFormResponse,
        Self::UserJoined,
        Self::UserLeft,
        Self::CursorUpdate,
        Self::QuestionCreate,
        Self::QuestionUpdate,
        Self::QuestionDelete,
        Self::Ping,
        Self::Pong,
        Self::Error,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionEstablished => "ConnectionEstablished",
            Self::JoinForm => "JoinForm",
            Self::JoinFormResponse => "JoinFormResponse",
            Self::LeaveForm => "LeaveForm",
            Self::LeaveFormResponse => "LeaveFormResponse",
            Self::UserJoined => "UserJoined",
            Self::UserLeft => "UserLeft",
            Self::CursorUpdate => "CursorUpdate",
            Self::QuestionCreate => "QuestionCreate",
            Self::QuestionUpdate => "QuestionUpdate",
            Self::QuestionDelete => "QuestionDelete",
            Self::Ping => "Ping",
            Self::Pong => "Pong",
            Self::Error => "Error",
        }
    }

    /// Look up a wire name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Whether the event mutates shared form state and needs edit capability.
    pub fn is_mutating(self) -> bool {
        self.edit_kind().is_some()
    }

    /// Edit kind for question events.
    pub fn edit_kind(self) -> Option<EditKind> {
        match self {
            Self::QuestionCreate => Some(EditKind::Create),
            Self::QuestionUpdate => Some(EditKind::Update),
            Self::QuestionDelete => Some(EditKind::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three structured question edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditKind {
    /// New question.
    Create,
    /// Changed question.
    Update,
    /// Removed question.
    Delete,
}

impl EditKind {
    /// Lowercase name as stored in edit records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Envelope type used for the request and the room broadcast.
    pub fn event_type(self) -> EventType {
        match self {
            Self::Create => EventType::QuestionCreate,
            Self::Update => EventType::QuestionUpdate,
            Self::Delete => EventType::QuestionDelete,
        }
    }

    /// Integration event type published to the bus.
    pub fn integration_type(self) -> &'static str {
        match self {
            Self::Create => "question.created",
            Self::Update => "question.updated",
            Self::Delete => "question.deleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_name() {
        for t in EventType::ALL {
            assert_eq!(EventType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn parse_is_case_sensitive() {
        assert_eq!(EventType::parse("ping"), None);
        assert_eq!(EventType::parse("join:form"), None);
        assert_eq!(EventType::parse(""), None);
    }

    #[test]
    fn serde_name_matches_wire_name() {
        let json = serde_json::to_string(&EventType::JoinFormResponse).unwrap();
        assert_eq!(json, "\"JoinFormResponse\"");
    }

    #[test]
    fn only_question_events_mutate() {
        let mutating: Vec<_> = EventType::ALL.into_iter().filter(|t| t.is_mutating()).collect();
        assert_eq!(
            mutating,
            vec![EventType::QuestionCreate, EventType::QuestionUpdate, EventType::QuestionDelete]
        );
    }

    #[test]
    fn edit_kind_names() {
        assert_eq!(EditKind::Update.integration_type(), "question.updated");
        assert_eq!(EditKind::Delete.event_type(), EventType::QuestionDelete);
        assert_eq!(serde_json::to_string(&EditKind::Create).unwrap(), "\"create\"");
    }
}
