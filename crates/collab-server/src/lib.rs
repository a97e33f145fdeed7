//! # collab-server
//!
//! Real-time collaboration hub for co-editing forms.
//!
//! Inbound envelopes flow through the [`dispatch::Dispatcher`] to one
//! [`dispatch::EventHandler`] per event type. Handlers check membership in
//! the [`websocket::rooms::RoomRegistry`], ask the
//! [`adapters::PermissionGate`] for capabilities, record ephemeral state in
//! the [`adapters::SessionStore`], broadcast to room members and hand
//! integration events to the [`adapters::EventPublisher`].
//!
//! The [`server::CollabServer`] exposes the hub over axum WebSockets with
//! `/health` and `/metrics` endpoints alongside.

#![deny(unsafe_code)]

pub mod adapters;
pub mod auth;
pub mod dispatch;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use dispatch::{Dispatcher, EventHandler, HubContext};
pub use server::CollabServer;
