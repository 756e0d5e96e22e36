// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::config::ConfigError;
use crate::flow::FlowError;
use crate::services::CacheError;

/// Startup-fatal connector errors.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigLoad(#[from] ConfigError),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
