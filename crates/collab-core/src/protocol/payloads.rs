//! Typed payload bodies for each event.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Inbound ─────────────────────────────────────────────────────────

/// `JoinForm` body. The form may instead be given on the envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinFormPayload {
    /// Form to join.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
}

/// `LeaveForm` body. Defaults to the connection's current room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveFormPayload {
    /// Form to leave.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
}

/// A pointer position on the form canvas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    /// Horizontal offset.
    pub x: i32,
    /// Vertical offset.
    pub y: i32,
    /// Question under the cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    /// Form section under the cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// `CursorUpdate` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdatePayload {
    /// Room the cursor belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    /// New position.
    pub position: CursorPosition,
}

/// A form question as sent by the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Question id.
    pub id: String,
    /// Question type (`text`, `choice`, ...).
    #[serde(rename = "type", default)]
    pub question_type: String,
    /// Title shown to respondents.
    #[serde(default)]
    pub title: String,
    /// Optional help text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether an answer is mandatory.
    #[serde(default)]
    pub required: bool,
    /// Choices for choice-type questions.
    #[serde(default)]
    pub options: Vec<String>,
    /// Free-form editor metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// `QuestionCreate` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionCreatePayload {
    /// Target form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    /// The new question.
    pub question: Question,
    /// Insertion index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

/// `QuestionUpdate` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionUpdatePayload {
    /// Target form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    /// Question being changed.
    pub question_id: String,
    /// Changed fields.
    #[serde(default)]
    pub changes: Map<String, Value>,
    /// Client-side version counter. Carried through, never compared.
    #[serde(default)]
    pub version: i64,
}

/// `QuestionDelete` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDeletePayload {
    /// Target form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    /// Question being removed.
    pub question_id: String,
}

// ── Outbound ────────────────────────────────────────────────────────

/// Roster entry for a user present in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUser {
    /// User id.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Role name.
    pub role: String,
    /// When the user's first connection joined.
    pub joined_at: String,
}

/// `ConnectionEstablished` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEstablishedPayload {
    /// Server-assigned connection id.
    pub client_id: String,
    /// Authenticated user.
    pub user_id: String,
}

/// `JoinFormResponse` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinFormResponse {
    /// Joined form.
    pub form_id: String,
    /// Joining user.
    pub user_id: String,
    /// Always `true`; failures are sent as `Error` envelopes.
    pub success: bool,
    /// Everyone in the room, in join order, including the joiner.
    pub room_users: Vec<RoomUser>,
    /// RFC3339 timestamp.
    pub timestamp: String,
}

/// `LeaveFormResponse` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveFormResponse {
    /// Left form.
    pub form_id: String,
    /// Leaving user.
    pub user_id: String,
    /// Always `true`.
    pub success: bool,
}

/// `UserJoined` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoinedPayload {
    /// Room.
    pub form_id: String,
    /// The newcomer.
    pub user: RoomUser,
}

/// `UserLeft` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeftPayload {
    /// Room.
    pub form_id: String,
    /// The departed user.
    pub user_id: String,
}

/// Outbound `CursorUpdate` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorBroadcast {
    /// Room.
    pub form_id: String,
    /// Whose cursor moved.
    pub user_id: String,
    /// Where it is now.
    pub position: CursorPosition,
    /// RFC3339 timestamp of the move.
    pub last_updated: String,
}

/// `Pong` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongPayload {
    /// Server time.
    pub timestamp: String,
}

/// `Error` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
