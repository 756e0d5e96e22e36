//! Built-in components and the component factory registry.

pub mod broker_input;
pub mod broker_output;
pub mod broker_request_response;
pub mod error_input;
pub mod pass_through;
pub mod registry;
pub mod subscription_router;

pub use broker_input::BrokerInput;
pub use broker_output::BrokerOutput;
pub use broker_request_response::BrokerRequestResponse;
pub use error_input::ErrorInput;
pub use pass_through::PassThrough;
pub use registry::{ComponentBuild, ComponentFactory, ComponentRegistry, PeerChannel};
pub use subscription_router::SubscriptionRouter;
