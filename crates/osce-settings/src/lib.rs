//! Layered configuration for the interview engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`OsceSettings::default()`]
//! 2. **User file**: `~/.osce/settings.json` or an explicit path, deep-merged over defaults
//! 3. **Environment variables**: `MAX_SESSIONS`, `SESSION_TTL`, `GENERATIVE_*`, `OSCE_*`
//!
//! The host loads settings once and passes the pieces it needs to each
//! service; there is no global instance.

pub mod duration;
pub mod errors;
pub mod loader;
pub mod types;

pub use duration::{parse_duration, HumanDuration};
pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, apply_overrides_from, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
