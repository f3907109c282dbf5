//! Switchboard Core
//!
//! Routing core of the integration engine:
//! - `Service`: start/stop state machine shared by every stateful part
//! - `Component` / `DefaultComponent`: per-scheme endpoint factories with a construct-once cache
//! - `ComponentRegistry`: explicit scheme registration with single-flight resolution
//! - `Endpoint`, `Producer`, `Consumer`: connector contracts
//! - `Processor`, `Pipeline`, `ThrowException`: short-circuiting exchange processing
//! - `Route` and `Engine`: wiring and ordered shutdown

pub mod component;
pub mod endpoint;
pub mod engine;
pub mod inflight;
pub mod lifecycle;
pub mod processor;
pub mod registry;
pub mod route;

pub use component::{
    build_configuration, build_endpoint, Component, ComponentContext, DefaultComponent,
    EndpointRequest, EndpointStrategy,
};
pub use endpoint::{Consumer, Endpoint, EndpointCore, Producer};
pub use engine::Engine;
pub use inflight::{InflightCounter, InflightGuard};
pub use lifecycle::{stop_all, stop_within, ResourceScope, Service, ServiceState, ServiceSupport};
pub use processor::{FnProcessor, LogProcessor, Pipeline, Processor, SendProcessor, ThrowException};
pub use registry::{ComponentFactory, ComponentRegistry};
pub use route::{ErrorHandler, LoggingErrorHandler, Route};
