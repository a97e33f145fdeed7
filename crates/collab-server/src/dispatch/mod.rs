//! Inbound envelope routing.

pub mod context;
pub mod handlers;
pub mod registry;

pub use context::HubContext;
pub use registry::{Dispatcher, EventHandler};
