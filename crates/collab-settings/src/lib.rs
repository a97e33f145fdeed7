//! # collab-settings
//!
//! Configuration for the collaboration hub, loaded from three layers in
//! priority order:
//! 1. **Compiled defaults**: [`HubSettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `COLLAB_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_overrides_from, deep_merge, load_settings, load_settings_with, parse_bool, parse_range,
};
pub use types::*;
