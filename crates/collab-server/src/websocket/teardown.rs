//! Connection teardown.

use std::sync::Arc;

use tracing::debug;

use super::connection::Connection;
use crate::dispatch::HubContext;
use crate::dispatch::handlers::leave::depart;

/// Release everything a connection holds.
///
/// Removes it from the connection registry, closes it and leaves every room
/// still holding it. Leaving notifies the remaining members and clears the
/// user's session records when this was their last connection there. Safe
/// to call more than once: only the caller that removes the connection from
/// the registry does any work. Returns whether this call did the teardown.
pub async fn teardown(ctx: &HubContext, connection: &Arc<Connection>) -> bool {
    if ctx.connections.remove(&connection.id).await.is_none() {
        return false;
    }

    // Closed before the room scan: a join still in flight is refused.
    connection.close();
    let mut forms = ctx.rooms.rooms_of(&connection.id).await;
    if let Some(current) = connection
        .take_current_room()
        .filter(|current| !forms.contains(current))
    {
        forms.push(current);
    }
    for form_id in &forms {
        let _ = depart(ctx, connection, form_id).await;
    }
    debug!(connection_id = %connection.id, user_id = connection.user_id(), "connection torn down");
    true
}
