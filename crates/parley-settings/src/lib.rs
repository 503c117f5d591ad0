//! # parley-settings
//!
//! Configuration for the parley server, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`ParleySettings::default()`]
//! 2. **Settings file**: `~/.parley/settings.json` or `$PARLEY_SETTINGS` (deep-merged over defaults)
//! 3. **Environment variables**: `PARLEY_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
