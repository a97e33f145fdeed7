//! Wire protocol: every frame in either direction is an [`Envelope`].

pub mod envelope;
pub mod events;
pub mod payloads;

pub use envelope::{Envelope, now_rfc3339};
pub use events::{EditKind, EventType};
pub use payloads::*;
