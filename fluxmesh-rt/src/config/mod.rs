//! Configuration document loading.

pub mod loader;

pub use loader::{deep_merge, load_config_files, resolve_config_values, ConfigError};
