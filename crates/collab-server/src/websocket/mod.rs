//! Connection lifecycle: mailboxes, rooms, liveness and teardown.

pub mod connection;
pub mod connections;
pub mod heartbeat;
pub mod rooms;
pub mod session;
pub mod teardown;

pub use connection::Connection;
pub use connections::ConnectionRegistry;
pub use rooms::RoomRegistry;
