//! Ephemeral presence, cursor and edit records.
//!
//! The hub issues commands against the store and never caches its records.
//! Failures are logged by callers and never propagated to clients.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use collab_core::protocol::{CursorPosition, EditKind};
use collab_settings::SessionStoreSettings;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors surfaced by a session store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable or refused the command.
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    /// Record could not be encoded for the backend.
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Presence record, created on join and deleted on leave or disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    /// User.
    pub user_id: String,
    /// Room.
    pub form_id: String,
    /// RFC3339 join time.
    pub joined_at: String,
    /// Connection that joined.
    pub client_id: String,
    /// Always `true` while the record exists.
    pub is_active: bool,
}

/// Latest cursor position for a user in a room. Each update overwrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorState {
    /// Room.
    pub form_id: String,
    /// User.
    pub user_id: String,
    /// Position.
    pub position: CursorPosition,
    /// RFC3339 time of the update.
    pub last_updated: String,
}

/// Append-only record of an accepted question edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionEdit {
    /// Question.
    pub question_id: String,
    /// Form.
    pub form_id: String,
    /// Editor.
    pub user_id: String,
    /// What happened.
    pub kind: EditKind,
    /// Changed fields (the full question for a create).
    pub changes: Value,
    /// Client-supplied version, stored as received.
    pub version: i64,
    /// RFC3339 time of the edit.
    pub timestamp: String,
}

/// Commands the hub issues against ephemeral external state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Record that a user joined a room.
    async fn save_user_session(&self, session: UserSession) -> Result<(), StoreError>;

    /// Delete a user's presence record for a room.
    async fn remove_user_session(&self, user_id: &str, form_id: &str) -> Result<(), StoreError>;

    /// Overwrite a user's cursor in a room.
    async fn update_cursor(&self, cursor: CursorState) -> Result<(), StoreError>;

    /// Delete a user's cursor in a room.
    async fn remove_cursor(&self, form_id: &str, user_id: &str) -> Result<(), StoreError>;

    /// Append an edit record.
    async fn save_question_edit(&self, edit: QuestionEdit) -> Result<(), StoreError>;

    /// Read a presence record.
    async fn user_session(
        &self,
        user_id: &str,
        form_id: &str,
    ) -> Result<Option<UserSession>, StoreError>;

    /// Read a cursor.
    async fn cursor(&self, form_id: &str, user_id: &str) -> Result<Option<CursorState>, StoreError>;

    /// Edits recorded for a form, oldest first.
    async fn question_edits(&self, form_id: &str) -> Result<Vec<QuestionEdit>, StoreError>;

    /// Presence records for a form.
    async fn room_users(&self, form_id: &str) -> Result<Vec<UserSession>, StoreError>;
}

/// Record lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreTtls {
    /// Presence.
    pub user_session: Duration,
    /// Cursor.
    pub cursor: Duration,
    /// Question edit.
    pub question_edit: Duration,
}

impl Default for StoreTtls {
    fn default() -> Self {
        Self::from(&SessionStoreSettings::default())
    }
}

impl From<&SessionStoreSettings> for StoreTtls {
    fn from(settings: &SessionStoreSettings) -> Self {
        Self {
            user_session: Duration::from_secs(settings.user_session_ttl_secs),
            cursor: Duration::from_secs(settings.cursor_ttl_secs),
            question_edit: Duration::from_secs(settings.question_edit_ttl_secs),
        }
    }
}

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process store with per-record TTLs.
///
/// Keys are `(form_id, user_id)` for sessions and cursors; edits are kept
/// per form in insertion order.
pub struct InMemorySessionStore {
    ttls: StoreTtls,
    sessions: DashMap<(String, String), Expiring<UserSession>>,
    cursors: DashMap<(String, String), Expiring<CursorState>>,
    edits: DashMap<String, Vec<Expiring<QuestionEdit>>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    pub fn new(ttls: StoreTtls) -> Self {
        Self {
            ttls,
            sessions: DashMap::new(),
            cursors: DashMap::new(),
            edits: DashMap::new(),
        }
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len() + self.cursors.len();
        self.sessions.retain(|_, v| v.is_live(now));
        self.cursors.retain(|_, v| v.is_live(now));
        let mut removed = before - (self.sessions.len() + self.cursors.len());

        for mut entry in self.edits.iter_mut() {
            let len = entry.len();
            entry.retain(|e| e.is_live(now));
            removed += len - entry.len();
        }
        self.edits.retain(|_, v| !v.is_empty());
        removed
    }

    /// Run [`purge_expired`](Self::purge_expired) every `interval` until
    /// `cancel` fires.
    pub fn start_purge_task(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.purge_expired();
                        if removed > 0 {
                            debug!(removed, "purged expired session records");
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
        })
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(StoreTtls::default())
    }
}

fn key(form_id: &str, user_id: &str) -> (String, String) {
    (form_id.to_owned(), user_id.to_owned())
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save_user_session(&self, session: UserSession) -> Result<(), StoreError> {
        let k = key(&session.form_id, &session.user_id);
        let _ = self
            .sessions
            .insert(k, Expiring::new(session, self.ttls.user_session));
        Ok(())
    }

    async fn remove_user_session(&self, user_id: &str, form_id: &str) -> Result<(), StoreError> {
        let _ = self.sessions.remove(&key(form_id, user_id));
        Ok(())
    }

    async fn update_cursor(&self, cursor: CursorState) -> Result<(), StoreError> {
        let k = key(&cursor.form_id, &cursor.user_id);
        let _ = self.cursors.insert(k, Expiring::new(cursor, self.ttls.cursor));
        Ok(())
    }

    async fn remove_cursor(&self, form_id: &str, user_id: &str) -> Result<(), StoreError> {
        let _ = self.cursors.remove(&key(form_id, user_id));
        Ok(())
    }

    async fn save_question_edit(&self, edit: QuestionEdit) -> Result<(), StoreError> {
        self.edits
            .entry(edit.form_id.clone())
            .or_default()
            .push(Expiring::new(edit, self.ttls.question_edit));
        Ok(())
    }

    async fn user_session(
        &self,
        user_id: &str,
        form_id: &str,
    ) -> Result<Option<UserSession>, StoreError> {
        let now = Instant::now();
        Ok(self
            .sessions
            .get(&key(form_id, user_id))
            .filter(|e| e.value().is_live(now))
            .map(|e| e.value().value.clone()))
    }

    async fn cursor(&self, form_id: &str, user_id: &str) -> Result<Option<CursorState>, StoreError> {
        let now = Instant::now();
        Ok(self
            .cursors
            .get(&key(form_id, user_id))
            .filter(|e| e.value().is_live(now))
            .map(|e| e.value().value.clone()))
    }

    async fn question_edits(&self, form_id: &str) -> Result<Vec<QuestionEdit>, StoreError> {
        let now = Instant::now();
        Ok(self
            .edits
            .get(form_id)
            .map(|edits| {
                edits
                    .iter()
                    .filter(|e| e.is_live(now))
                    .map(|e| e.value.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn room_users(&self, form_id: &str) -> Result<Vec<UserSession>, StoreError> {
        let now = Instant::now();
        let mut users: Vec<UserSession> = self
            .sessions
            .iter()
            .filter(|e| e.key().0 == form_id && e.value().is_live(now))
            .map(|e| e.value().value.clone())
            .collect();
        users.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(users)
    }
}
