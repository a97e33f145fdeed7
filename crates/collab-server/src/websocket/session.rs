//! WebSocket session lifecycle, from upgrade through teardown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use collab_core::protocol::ConnectionEstablishedPayload;
use collab_core::{Envelope, EventType, HubError, UserIdentity};
use collab_settings::HubSettings;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use super::connection::Connection;
use super::teardown::teardown;
use crate::dispatch::registry::report_error;
use crate::dispatch::{Dispatcher, HubContext};
use crate::metrics as names;

/// How long the writer gets to flush a close frame after the reader stops.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Per-connection limits taken from settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Outbound mailbox depth.
    pub mailbox_capacity: usize,
    /// Interval between server-initiated Ping frames.
    pub ping_interval: Duration,
    /// Inbound frames allowed per window.
    pub rate_max: u32,
    /// Rate limit window.
    pub rate_window: Duration,
}

impl From<&HubSettings> for SessionLimits {
    fn from(settings: &HubSettings) -> Self {
        Self {
            mailbox_capacity: settings.websocket.mailbox_capacity,
            ping_interval: settings.heartbeat.ping_interval(),
            rate_max: settings.rate_limit.max_messages,
            rate_window: settings.rate_limit.window(),
        }
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from(&HubSettings::default())
    }
}

/// Run a WebSocket session for an authenticated client.
///
/// 1. Registers the connection and sends `ConnectionEstablished`
/// 2. Forwards the mailbox to the socket, with periodic Ping frames
/// 3. Dispatches inbound text (or UTF-8 binary) frames in arrival order
/// 4. Tears the connection down when the socket ends or it is closed
#[instrument(skip_all, fields(user_id = %identity.user_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    identity: UserIdentity,
    ctx: Arc<HubContext>,
    dispatcher: Arc<Dispatcher>,
    limits: SessionLimits,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(limits.mailbox_capacity.max(1));
    let connection = Arc::new(Connection::new(identity, send_tx));
    let client_id = connection.id.clone();

    info!(%client_id, "client connected");
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).increment(1.0);
    ctx.connections.add(connection.clone()).await;

    let established = Envelope::with_payload(
        EventType::ConnectionEstablished,
        None,
        &ConnectionEstablishedPayload {
            client_id: client_id.clone(),
            user_id: connection.user_id().to_owned(),
        },
    );
    let _ = connection.send_envelope(&established);

    // Outbound forwarder with periodic Ping frames.
    let close = connection.close_token();
    let ping_every = limits.ping_interval;
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_str().to_owned().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
                () = close.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = connection.closed() => break,
        };
        let Some(Ok(msg)) = msg else { break };

        let text = match msg {
            Message::Text(ref t) => Some(t.to_string()),
            Message::Binary(ref data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    Some(s.to_owned())
                } else {
                    debug!(%client_id, len = data.len(), "dropping non-UTF8 binary frame");
                    None
                }
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.touch_heartbeat();
                None
            }
            Message::Close(_) => {
                info!(%client_id, "client sent close frame");
                break;
            }
        };
        let Some(text) = text else { continue };

        if !connection.check_rate(limits.rate_max, limits.rate_window) {
            report_error(&connection, "envelope", None, &HubError::RateLimited);
            continue;
        }

        dispatcher.handle_frame(&ctx, &connection, &text).await;
    }

    let _ = teardown(&ctx, &connection).await;
    if tokio::time::timeout(CLOSE_GRACE, &mut outbound).await.is_err() {
        outbound.abort();
    }

    info!(%client_id, dropped = connection.drop_count(), "client disconnected");
    counter!(names::WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(names::WS_CONNECTION_DURATION_SECONDS)
        .record(connection.connected_at.elapsed().as_secs_f64());
}
