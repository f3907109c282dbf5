//! Switchboard Common
//!
//! Shared data model for the routing core:
//! - Exchange / Message: the unit of work flowing through pipelines
//! - Error taxonomy: resolution, configuration, lifecycle and processing errors
//! - Logging bootstrap for applications and tests

pub mod error;
pub mod exchange;
pub mod logging;
pub mod message;

pub use error::{
    ConfigurationError, ErrorKind, LifecycleError, ProcessingError, ResolutionError,
    SwitchboardError,
};
pub use exchange::{AbandonHandle, Exchange, ExchangePattern};
pub use message::{Body, Message};

/// Typed value used for headers and exchange properties
pub use serde_json::Value;

pub type Result<T> = std::result::Result<T, SwitchboardError>;
