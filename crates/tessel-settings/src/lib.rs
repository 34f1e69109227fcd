//! # tessel-settings
//!
//! Configuration for the Tessel runtime, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`TesselSettings::default()`]
//! 2. **User file**: `~/.tessel/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TESSEL_*` overrides (highest priority)
//!
//! Settings are validated with [`TesselSettings::validate`] before a session
//! is built; an invalid value is a fatal configuration error.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
