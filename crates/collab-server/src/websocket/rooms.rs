//! Room registry: the single synchronization point for membership and
//! fan-out.
//!
//! A room is keyed by form id and holds one entry per user. Each user entry
//! holds every connection that user joined from, so a user with two tabs
//! appears once in the roster. Rooms are created on first join and removed
//! when their last connection leaves.
//!
//! The map sits behind one `RwLock`: broadcasts and snapshots share the read
//! side, joins and leaves take the write side. Fan-out uses the non-blocking
//! [`Connection::enqueue`], so a full mailbox drops that one copy and never
//! stalls delivery to anyone else.

use std::collections::HashMap;
use std::sync::Arc;

use collab_core::HubError;
use collab_core::protocol::{Envelope, RoomUser};
use metrics::{counter, gauge};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::Connection;
use crate::metrics as names;

struct Member {
    user: RoomUser,
    /// Join order, for a stable roster.
    seq: u64,
    connections: HashMap<String, Arc<Connection>>,
}

#[derive(Default)]
struct Room {
    members: HashMap<String, Member>,
    next_seq: u64,
}

impl Room {
    fn roster(&self) -> Vec<RoomUser> {
        let mut members: Vec<&Member> = self.members.values().collect();
        members.sort_by_key(|m| m.seq);
        members.into_iter().map(|m| m.user.clone()).collect()
    }

    fn connection_count(&self) -> usize {
        self.members.values().map(|m| m.connections.len()).sum()
    }
}

/// Result of [`RoomRegistry::join_room`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The room did not exist before this join.
    pub created_room: bool,
    /// This is the user's first connection in the room.
    pub first_for_user: bool,
    /// The connection was already a member (re-join).
    pub already_member: bool,
    /// Roster after the join, in join order.
    pub roster: Vec<RoomUser>,
}

/// Result of [`RoomRegistry::leave_room`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// The connection was a member before the call.
    pub was_member: bool,
    /// The user has no connections left in the room.
    pub user_gone: bool,
    /// The room became empty and was removed.
    pub room_removed: bool,
}

/// Per-broadcast delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Copies accepted by a mailbox.
    pub delivered: usize,
    /// Copies dropped on a full or closed mailbox.
    pub dropped: usize,
}

/// Read-only view of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    /// Form id.
    pub form_id: String,
    /// Distinct users, in join order.
    pub users: Vec<RoomUser>,
    /// Connection ids across all users.
    pub connection_ids: Vec<String>,
}

/// Owns every room.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
    max_users_per_room: usize,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new(max_users_per_room: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_users_per_room,
        }
    }

    /// Add `connection` to the room for `form_id`, creating the room if
    /// needed.
    ///
    /// Fails with [`HubError::RoomFull`] when a new user would exceed the
    /// per-room limit. Additional connections of a present user always fit.
    /// A connection that was closed before the write lock was taken is
    /// refused, so teardown never races a join into leaving it behind.
    pub async fn join_room(
        &self,
        form_id: &str,
        connection: &Arc<Connection>,
    ) -> Result<JoinOutcome, HubError> {
        let user_id = connection.user_id().to_owned();
        let mut rooms = self.rooms.write().await;
        if connection.is_closed() {
            return Err(HubError::Internal {
                message: format!("connection {} closed before joining '{form_id}'", connection.id),
            });
        }

        let created_room = !rooms.contains_key(form_id);
        if created_room {
            let _ = rooms.insert(form_id.to_owned(), Room::default());
            gauge!(names::HUB_ROOMS_ACTIVE).increment(1.0);
        }
        let Some(room) = rooms.get_mut(form_id) else {
            return Err(HubError::Internal {
                message: format!("room '{form_id}' vanished during join"),
            });
        };

        if !room.members.contains_key(&user_id) && room.members.len() >= self.max_users_per_room {
            if created_room {
                let _ = rooms.remove(form_id);
                gauge!(names::HUB_ROOMS_ACTIVE).decrement(1.0);
            }
            return Err(HubError::RoomFull {
                form_id: form_id.to_owned(),
                limit: self.max_users_per_room,
            });
        }

        let seq = room.next_seq;
        let member = room.members.entry(user_id.clone()).or_insert_with(|| Member {
            user: connection.identity().to_room_user(),
            seq,
            connections: HashMap::new(),
        });
        let first_for_user = member.connections.is_empty();
        let already_member = member
            .connections
            .insert(connection.id.clone(), Arc::clone(connection))
            .is_some();
        if first_for_user {
            room.next_seq += 1;
        }

        debug!(form_id, %user_id, connection_id = %connection.id, first_for_user, "joined room");
        Ok(JoinOutcome {
            created_room,
            first_for_user,
            already_member,
            roster: room.roster(),
        })
    }

    /// Remove `connection` from the room for `form_id`, deleting the room
    /// if it is now empty.
    pub async fn leave_room(&self, form_id: &str, connection: &Connection) -> LeaveOutcome {
        let user_id = connection.user_id();
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(form_id) else {
            return LeaveOutcome::default();
        };
        let Some(member) = room.members.get_mut(user_id) else {
            return LeaveOutcome::default();
        };

        let was_member = member.connections.remove(&connection.id).is_some();
        let user_gone = member.connections.is_empty();
        if user_gone {
            let _ = room.members.remove(user_id);
        }
        let room_removed = room.members.is_empty();
        if room_removed {
            let _ = rooms.remove(form_id);
            gauge!(names::HUB_ROOMS_ACTIVE).decrement(1.0);
        }

        debug!(form_id, user_id, connection_id = %connection.id, user_gone, room_removed, "left room");
        LeaveOutcome {
            was_member,
            user_gone: was_member && user_gone,
            room_removed,
        }
    }

    /// Snapshot of a room's membership.
    pub async fn get_room(&self, form_id: &str) -> Option<RoomSnapshot> {
        let rooms = self.rooms.read().await;
        let room = rooms.get(form_id)?;
        let mut connection_ids: Vec<String> = room
            .members
            .values()
            .flat_map(|m| m.connections.keys().cloned())
            .collect();
        connection_ids.sort();
        Some(RoomSnapshot {
            form_id: form_id.to_owned(),
            users: room.roster(),
            connection_ids,
        })
    }

    /// Whether `connection_id` is currently in the room for `form_id`.
    pub async fn is_member(&self, form_id: &str, connection_id: &str) -> bool {
        self.rooms.read().await.get(form_id).is_some_and(|room| {
            room.members
                .values()
                .any(|m| m.connections.contains_key(connection_id))
        })
    }

    /// Whether any connection of `user_id` is in the room for `form_id`.
    pub async fn has_user(&self, form_id: &str, user_id: &str) -> bool {
        self.rooms
            .read()
            .await
            .get(form_id)
            .is_some_and(|room| room.members.contains_key(user_id))
    }

    /// Every room holding `connection_id`, sorted.
    pub async fn rooms_of(&self, connection_id: &str) -> Vec<String> {
        let rooms = self.rooms.read().await;
        let mut forms: Vec<String> = rooms
            .iter()
            .filter(|(_, room)| {
                room.members
                    .values()
                    .any(|m| m.connections.contains_key(connection_id))
            })
            .map(|(form_id, _)| form_id.clone())
            .collect();
        forms.sort();
        forms
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Number of connections in a room.
    pub async fn connection_count(&self, form_id: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(form_id)
            .map_or(0, Room::connection_count)
    }

    /// Deliver `envelope` to every connection in the room, the sender's
    /// included.
    pub async fn broadcast(&self, form_id: &str, envelope: &Envelope) -> BroadcastReport {
        self.fan_out(form_id, None, envelope).await
    }

    /// Deliver `envelope` to every connection in the room except those of
    /// `exclude_user_id`.
    pub async fn broadcast_except(
        &self,
        form_id: &str,
        exclude_user_id: &str,
        envelope: &Envelope,
    ) -> BroadcastReport {
        self.fan_out(form_id, Some(exclude_user_id), envelope).await
    }

    async fn fan_out(
        &self,
        form_id: &str,
        exclude_user_id: Option<&str>,
        envelope: &Envelope,
    ) -> BroadcastReport {
        let message = match envelope.encode() {
            Ok(json) => Arc::new(json),
            Err(error) => {
                warn!(form_id, %error, "failed to encode broadcast");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(form_id) else {
            return report;
        };

        for (user_id, member) in &room.members {
            if exclude_user_id == Some(user_id.as_str()) {
                continue;
            }
            for connection in member.connections.values() {
                if connection.enqueue(Arc::clone(&message)) {
                    report.delivered += 1;
                } else {
                    report.dropped += 1;
                    counter!(names::HUB_BROADCAST_DROPS_TOTAL).increment(1);
                    debug!(
                        form_id,
                        %user_id,
                        connection_id = %connection.id,
                        event_type = %envelope.event_type,
                        "mailbox full, broadcast dropped for recipient"
                    );
                }
            }
        }
        report
    }
}
