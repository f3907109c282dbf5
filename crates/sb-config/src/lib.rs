//! Switchboard Configuration
//!
//! - `EndpointUri`: parser for `scheme:remaining-path[?key=value&...]`
//! - `EndpointConfiguration`: typed, validated view over URI parameters
//! - `EngineConfig`: TOML engine settings with environment overrides

pub mod duration;
pub mod engine;
pub mod parameters;
pub mod uri;

pub use duration::parse_duration;
pub use engine::{EngineConfig, LogFormat, LoggingConfig};
pub use parameters::{EndpointConfiguration, ParameterKind, ParameterSpec, ParameterValue};
pub use uri::{normalize_uri, EndpointUri};

/// Component settings tables are `toml::Table`s
pub use toml;
