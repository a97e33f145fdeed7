//! Idle connection sweep.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::teardown::teardown;
use crate::dispatch::HubContext;
use crate::metrics as names;

/// Close and tear down every connection with no heartbeat for `timeout`.
/// Returns how many were closed.
pub async fn sweep_idle(ctx: &HubContext, timeout: Duration) -> usize {
    let idle = ctx.connections.idle(timeout).await;
    let mut closed = 0;
    for connection in &idle {
        warn!(
            connection_id = %connection.id,
            user_id = connection.user_id(),
            idle_ms = u64::try_from(connection.idle_for().as_millis()).unwrap_or(u64::MAX),
            "heartbeat timeout, closing connection"
        );
        counter!(names::HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
        connection.close();
        if teardown(ctx, connection).await {
            closed += 1;
        }
    }
    closed
}

/// Run [`sweep_idle`] every `interval` until `cancel` fires.
pub async fn run_idle_sweep(
    ctx: Arc<HubContext>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let closed = sweep_idle(&ctx, timeout).await;
                if closed > 0 {
                    debug!(closed, "idle sweep finished");
                }
            }
            () = cancel.cancelled() => {
                debug!("idle sweep stopped");
                return;
            }
        }
    }
}
