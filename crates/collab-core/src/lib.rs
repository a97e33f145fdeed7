//! Shared vocabulary for the form collaboration hub.
//!
//! - [`protocol`]: the wire envelope, event types and typed payloads
//! - [`identity`]: verified user identities and per-form capabilities
//! - [`errors`]: the hub error taxonomy and its wire codes
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod identity;
pub mod logging;
pub mod protocol;

pub use errors::HubError;
pub use identity::{Capability, UserIdentity};
pub use protocol::{Envelope, EventType};
