//! Flow execution engine: component contract, per-component runners,
//! flow wiring, and the request/response controller.

pub mod component;
pub mod config;
pub mod error;
#[allow(clippy::module_inception)]
pub mod flow;
pub mod request_response;
pub mod runner;

pub use component::{
    Component, ComponentContext, ComponentInfo, ComponentOutput, ConfigParameter, FlowEmitter,
    FlowSink, NextLink,
};
pub use config::{ComponentNode, FlowConfig, NextOverride, DEFAULT_QUEUE_MAX_DEPTH};
pub use error::{ComponentError, FlowError, RequestError};
pub use flow::Flow;
pub use request_response::{value_is_truthy, RequestResponseController, ResponseStream};
pub use runner::{ComponentRunner, RunnerBackoff};
