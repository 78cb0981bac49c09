//! # stackly-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`StacklySettings::default()`]
//! 2. **User file**: `~/.stackly/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `STACKLY_*` and `REDIS_*` overrides
//!
//! ```no_run
//! let settings = stackly_settings::load_settings().unwrap_or_default();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_from_path, settings_path, stackly_home, validate,
};
pub use types::*;
