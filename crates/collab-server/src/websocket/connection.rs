//! Per-client connection state and its bounded outbound mailbox.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use collab_core::{Envelope, UserIdentity};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Fixed window for the inbound rate limiter.
#[derive(Debug)]
struct RateWindow {
    started: Instant,
    count: u32,
}

/// A connected client.
///
/// Owned by its session task; rooms and the connection registry hold
/// `Arc` references for fan-out and liveness checks.
pub struct Connection {
    /// Unique connection ID.
    pub id: String,
    identity: UserIdentity,
    /// Room this connection has joined, if any. At most one.
    current_room: Mutex<Option<String>>,
    /// Mailbox drained by the session's outbound writer.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    last_heartbeat: Mutex<Instant>,
    dropped_messages: AtomicU64,
    closed: CancellationToken,
    rate: Mutex<RateWindow>,
}

impl Connection {
    /// Create a connection with a fresh UUID v7 id.
    pub fn new(identity: UserIdentity, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self::with_id(uuid::Uuid::now_v7().to_string(), identity, tx)
    }

    /// Create a connection with a caller-chosen id.
    pub fn with_id(id: String, identity: UserIdentity, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            identity,
            current_room: Mutex::new(None),
            tx,
            connected_at: now,
            last_heartbeat: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            closed: CancellationToken::new(),
            rate: Mutex::new(RateWindow { started: now, count: 0 }),
        }
    }

    /// Authenticated identity.
    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    /// Shorthand for `identity().user_id`.
    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    /// Current room, if joined.
    pub fn current_room(&self) -> Option<String> {
        self.current_room.lock().clone()
    }

    /// Record the joined room, returning the previous one.
    pub fn set_current_room(&self, form_id: &str) -> Option<String> {
        self.current_room.lock().replace(form_id.to_owned())
    }

    /// Clear the current room if it is `form_id`.
    pub fn clear_room(&self, form_id: &str) -> bool {
        let mut room = self.current_room.lock();
        if room.as_deref() == Some(form_id) {
            *room = None;
            true
        } else {
            false
        }
    }

    /// Clear and return the current room.
    pub fn take_current_room(&self) -> Option<String> {
        self.current_room.lock().take()
    }

    /// Try to place a message on the mailbox without blocking.
    ///
    /// Returns `false` when the mailbox is full or closed. The message is
    /// dropped and counted; callers never retry.
    pub fn enqueue(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize an envelope and enqueue it.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.encode() {
            Ok(json) => self.enqueue(Arc::new(json)),
            Err(error) => {
                warn!(connection_id = %self.id, %error, "failed to encode envelope");
                false
            }
        }
    }

    /// Messages dropped because the mailbox was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record a heartbeat.
    pub fn touch_heartbeat(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    /// Time since the last heartbeat (or since connecting).
    pub fn idle_for(&self) -> Duration {
        self.last_heartbeat.lock().elapsed()
    }

    /// Count one inbound frame against a fixed window.
    ///
    /// Returns `false` once more than `max` frames arrive within `window`.
    pub fn check_rate(&self, max: u32, window: Duration) -> bool {
        let mut rate = self.rate.lock();
        let now = Instant::now();
        if now.duration_since(rate.started) >= window {
            rate.started = now;
            rate.count = 0;
        }
        rate.count = rate.count.saturating_add(1);
        rate.count <= max
    }

    /// Signal the session task to tear this connection down.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Token cancelled on close, for tasks that outlive a borrow.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.identity.user_id)
            .field("current_room", &self.current_room())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_core::EventType;

    fn make_connection(capacity: usize) -> (Connection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Connection::with_id("conn_1".into(), UserIdentity::guest("u1"), tx);
        (conn, rx)
    }

    #[test]
    fn create_connection() {
        let (conn, _rx) = make_connection(4);
        assert_eq!(conn.id, "conn_1");
        assert_eq!(conn.user_id(), "u1");
        assert!(conn.current_room().is_none());
        assert!(!conn.is_closed());
    }

    #[test]
    fn generated_ids_are_unique() {
        let (tx, _rx) = mpsc::channel(1);
        let a = Connection::new(UserIdentity::guest("u"), tx.clone());
        let b = Connection::new(UserIdentity::guest("u"), tx);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn enqueue_delivers() {
        let (conn, mut rx) = make_connection(4);
        assert!(conn.enqueue(Arc::new("hello".into())));
        assert_eq!(rx.recv().await.unwrap().as_str(), "hello");
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn enqueue_full_mailbox_drops() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.enqueue(Arc::new("one".into())));
        assert!(!conn.enqueue(Arc::new("two".into())));
        assert!(!conn.enqueue(Arc::new("three".into())));
        assert_eq!(conn.drop_count(), 2);
    }

    #[test]
    fn enqueue_closed_mailbox_drops() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert!(!conn.enqueue(Arc::new("late".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_envelope_encodes_json() {
        let (conn, mut rx) = make_connection(4);
        let env = Envelope::new(EventType::Pong, None, serde_json::json!({}));
        assert!(conn.send_envelope(&env));
        let text = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], "Pong");
    }

    #[test]
    fn room_tracking() {
        let (conn, _rx) = make_connection(1);
        assert_eq!(conn.set_current_room("f1"), None);
        assert_eq!(conn.set_current_room("f2").as_deref(), Some("f1"));
        assert!(!conn.clear_room("f1"));
        assert_eq!(conn.current_room().as_deref(), Some("f2"));
        assert!(conn.clear_room("f2"));
        assert!(conn.current_room().is_none());
        let _ = conn.set_current_room("f3");
        assert_eq!(conn.take_current_room().as_deref(), Some("f3"));
        assert!(conn.current_room().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_resets_idle_time() {
        let (conn, _rx) = make_connection(1);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(conn.idle_for() >= Duration::from_secs(30));
        conn.touch_heartbeat();
        assert!(conn.idle_for() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_window() {
        let (conn, _rx) = make_connection(1);
        let window = Duration::from_secs(1);
        assert!(conn.check_rate(2, window));
        assert!(conn.check_rate(2, window));
        assert!(!conn.check_rate(2, window));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(conn.check_rate(2, window));
    }

    #[tokio::test]
    async fn close_resolves_waiters() {
        let (conn, _rx) = make_connection(1);
        let conn = Arc::new(conn);
        let waiter = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.closed().await })
        };
        conn.close();
        waiter.await.unwrap();
        assert!(conn.is_closed());
    }
}
