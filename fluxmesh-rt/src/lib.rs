//! # fluxmesh-rt - Declarative Streaming Integration Runtime
//!
//! Wires a broker-attached message pipeline out of a configuration
//! document. An operator describes *apps*, each owning one or more
//! *flows*, each flow a linear chain of *components*; the runtime
//! instantiates the chain, feeds it messages from a message broker,
//! executes per-component transforms, and delivers results back to the
//! broker.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use fluxmesh_rt::connector::Connector;
//! use fluxmesh_rt::config::load_config_files;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config_files(&["config.yaml"])?;
//!     let mut connector = Connector::new(config)?;
//!     connector.run().await?;
//!     connector.wait().await;
//!     connector.cleanup().await;
//!     Ok(())
//! }
//! ```
//!
//! # Core Pieces
//!
//! - [`message`] - envelope, events, path expressions, payload codec
//! - [`broker`] - broker abstraction (JetStream + in-process dev broker)
//! - [`flow`] - component contract, per-component runners, flows, and the
//!   request/response controller
//! - [`components`] - built-in broker components and the factory registry
//! - [`app`] - standard and simplified app forms
//! - [`connector`] - the process root
//! - [`control`] - command/control plane and tracing system
//! - [`services`] - timers, cache, kv/locks, monitoring, error queue
//! - [`config`] - YAML loading, merging, environment substitution
//!
//! # Delivery Semantics
//!
//! At-least-once: every envelope accepted from the broker is settled
//! exactly once, by the ack chain when the tail completes or by the nack
//! chain (with a `FAILED`/`REJECTED` outcome) when a component fails.
//! Bounded per-component channels give natural backpressure; nothing is
//! acked until the chain completes, so the broker redelivers on failure.
//!
//! # Custom Components
//!
//! Implement [`flow::Component`] and register a factory on the
//! [`components::ComponentRegistry`] (via
//! `connector.services().components`) before calling `run`. Configuration
//! then refers to the component by its registered `component_module`
//! name.

pub mod app;
pub mod broker;
pub mod components;
pub mod config;
pub mod connector;
pub mod control;
pub mod flow;
pub mod message;
pub mod services;

// Re-export commonly used types
pub use app::App;
pub use broker::{Broker, BrokerConfig, BrokerError, ConnectionStatus, DevBrokerHub};
pub use components::ComponentRegistry;
pub use connector::{Connector, ConnectorError};
pub use control::{CommandControlService, TraceLevel, TracingSystem};
pub use flow::{
    Component, ComponentContext, ComponentError, ComponentInfo, ComponentOutput, Flow, FlowError,
    RequestError, RequestResponseController,
};
pub use message::{Envelope, Event, NackOutcome};
pub use services::SharedServices;
