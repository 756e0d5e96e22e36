//! Process-level container: config validation, app registry, shared
//! services, command/control wiring, shutdown signal.

#[allow(clippy::module_inception)]
pub mod connector;
pub mod error;
pub mod validation;

pub use connector::Connector;
pub use error::ConnectorError;
pub use validation::validate_config;
