// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::broker::BrokerError;
use crate::message::{CodecError, ExpressionError, TransformError};

/// Failure raised by a component's `process` (or a lifecycle hook).
///
/// Component errors never cross the flow boundary: the runner settles the
/// envelope with the component's declared nack outcome, diverts an error
/// envelope to the error queue and keeps running.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// Free-form failure from user code.
    #[error("{0}")]
    Message(String),

    /// The derived input did not have the shape the component requires.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A required config parameter is missing or malformed.
    #[error("invalid component config: {0}")]
    Config(String),

    /// A broker operation failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Payload encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ComponentError {
    /// Short tag used in error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            ComponentError::Message(_) => "Message",
            ComponentError::InvalidInput(_) => "InvalidInput",
            ComponentError::Config(_) => "Config",
            ComponentError::Broker(_) => "Broker",
            ComponentError::Codec(_) => "Codec",
        }
    }
}

/// Failure constructing or operating a flow. Startup-fatal.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("flow {0} has no components")]
    EmptyFlow(String),

    #[error("flow {flow}: unknown component kind {kind}")]
    UnknownComponentKind { flow: String, kind: String },

    #[error("invalid flow config: {0}")]
    Config(String),

    #[error("component {component}: {source}")]
    Component {
        component: String,
        #[source]
        source: ComponentError,
    },

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Failure surfaced to callers of the request/response controller.
///
/// The only component-adjacent error that crosses back to a synchronous
/// caller.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("timeout waiting for response after {0:?}")]
    Timeout(Duration),

    #[error("request/response flow is shut down")]
    Closed,

    #[error(transparent)]
    Flow(#[from] FlowError),
}
