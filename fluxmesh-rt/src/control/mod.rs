//! Command & control plane: entity registry, verb/path routing over
//! broker topics, response/status/metrics/registry publishers, and the
//! tracing system.

pub mod adapter;
pub mod entity;
pub mod registry;
pub mod router;
pub mod schema;
pub mod service;
pub mod tracing;

pub use adapter::{BrokerAdapter, DEFAULT_NAMESPACE, DEFAULT_TOPIC_PREFIX};
pub use entity::{connector_entity, TopologySnapshot};
pub use registry::{
    Endpoint, EndpointHandler, EndpointMethod, EntityDescriptor, EntityRegistry, HandlerArgs,
};
pub use router::{CommandRequest, CommandResponse, RequestRouter};
pub use service::CommandControlService;
pub use tracing::{TraceContext, TraceLevel, TracePublisher, TracingSystem};
