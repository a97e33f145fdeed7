//! Settings structs. Every field has a compiled default so partial files
//! deserialize cleanly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Per-connection and per-room limits.
    pub websocket: WebSocketSettings,
    /// Liveness detection.
    pub heartbeat: HeartbeatSettings,
    /// Inbound message budget per connection.
    pub rate_limit: RateLimitSettings,
    /// Token verification.
    pub auth: AuthSettings,
    /// Ephemeral record TTLs.
    pub session_store: SessionStoreSettings,
    /// Integration event forwarding.
    pub publisher: PublisherSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl HubSettings {
    /// Reject values the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.websocket.mailbox_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "websocket.mailboxCapacity must be positive".into(),
            ));
        }
        if self.websocket.max_users_per_room == 0 {
            return Err(SettingsError::InvalidValue(
                "websocket.maxUsersPerRoom must be positive".into(),
            ));
        }
        if self.heartbeat.sweep_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeat.sweepIntervalMs must be positive".into(),
            ));
        }
        if self.heartbeat.idle_timeout_ms <= self.heartbeat.sweep_interval_ms {
            return Err(SettingsError::InvalidValue(
                "heartbeat.idleTimeoutMs must exceed heartbeat.sweepIntervalMs".into(),
            ));
        }
        if self.rate_limit.max_messages == 0 || self.rate_limit.window_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "rateLimit.maxMessages and rateLimit.windowMs must be positive".into(),
            ));
        }
        if self.publisher.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "publisher.queueCapacity must be positive".into(),
            ));
        }
        if self.auth.required && self.auth.jwt_secret.is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.jwtSecret is required when auth.required is true".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` picks a free port.
    pub port: u16,
    /// CORS origins. `*` allows any.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8083,
            allowed_origins: vec!["*".to_string()],
        }
    }
}

/// Connection and room limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketSettings {
    /// Outbound mailbox depth per connection.
    pub mailbox_capacity: usize,
    /// Largest accepted inbound frame.
    pub max_message_bytes: usize,
    /// Distinct users allowed in one room.
    pub max_users_per_room: usize,
    /// Upper bound on a single handler invocation.
    pub handler_timeout_ms: u64,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            max_message_bytes: 64 * 1024,
            max_users_per_room: 100,
            handler_timeout_ms: 10_000,
        }
    }
}

impl WebSocketSettings {
    /// Handler timeout as a `Duration`.
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

/// Liveness settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// How often the idle sweep runs.
    pub sweep_interval_ms: u64,
    /// A connection with no heartbeat for this long is closed.
    pub idle_timeout_ms: u64,
    /// Interval between server-initiated WebSocket pings.
    pub ping_interval_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 30_000,
            idle_timeout_ms: 60_000,
            ping_interval_ms: 54_000,
        }
    }
}

impl HeartbeatSettings {
    /// Sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Idle timeout.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Ping interval.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

/// Fixed-window inbound rate limit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitSettings {
    /// Frames allowed per window.
    pub max_messages: u32,
    /// Window length.
    pub window_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_messages: 120,
            window_ms: 1_000,
        }
    }
}

impl RateLimitSettings {
    /// Window as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Token verification settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 signing secret shared with the auth service.
    pub jwt_secret: String,
    /// Reject connections without a valid token. Disable only for local
    /// development; unauthenticated users get a permissionless guest identity.
    pub required: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            required: true,
        }
    }
}

/// TTLs for ephemeral records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionStoreSettings {
    /// Presence record lifetime.
    pub user_session_ttl_secs: u64,
    /// Cursor record lifetime.
    pub cursor_ttl_secs: u64,
    /// Question edit record lifetime.
    pub question_edit_ttl_secs: u64,
    /// How often expired records are purged.
    pub purge_interval_ms: u64,
}

impl Default for SessionStoreSettings {
    fn default() -> Self {
        Self {
            user_session_ttl_secs: 2 * 60 * 60,
            cursor_ttl_secs: 5 * 60,
            question_edit_ttl_secs: 60 * 60,
            purge_interval_ms: 60_000,
        }
    }
}

/// Integration event forwarding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublisherSettings {
    /// Events buffered before new ones are dropped.
    pub queue_capacity: usize,
    /// Bus ingestion endpoint. Events are only logged when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Stamped into every event's `source`.
    pub source: String,
    /// Stamped into every event's `version`.
    pub version: String,
    /// Per-request timeout for the webhook sink.
    pub request_timeout_ms: u64,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            webhook_url: None,
            source: "collaboration-service".to_string(),
            version: "1.0".to_string(),
            request_timeout_ms: 5_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
