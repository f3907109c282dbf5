//! Error taxonomy
//!
//! Resolution, configuration and lifecycle failures are returned through
//! `Result`. Processing failures are data: they live in an exchange's
//! exception slot and are never returned from a processor.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Synchronous Errors
// ============================================================================

/// A URI could not be turned into an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("No component registered for scheme: {scheme}")]
    UnknownScheme { scheme: String },

    #[error("Malformed URI '{uri}': {reason}")]
    MalformedUri { uri: String, reason: String },

    #[error("Component '{scheme}' cannot handle URI: {uri}")]
    SchemeMismatch { scheme: String, uri: String },

    #[error("No endpoint produced for URI: {uri}")]
    Declined { uri: String },
}

impl ResolutionError {
    pub fn malformed(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}

/// Missing, invalid or un-coercible configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Missing required parameter '{name}' for {uri}")]
    MissingParameter { uri: String, name: String },

    #[error("Invalid value '{value}' for parameter '{name}': expected {expected}")]
    InvalidValue {
        name: String,
        value: String,
        expected: &'static str,
    },

    #[error("Unknown parameters for {uri}: {}", names.join(", "))]
    UnknownParameters { uri: String, names: Vec<String> },

    #[error("Parameter '{name}' is not valid percent-encoded UTF-8")]
    InvalidEncoding { name: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to load configuration from {path}: {message}")]
    Load { path: String, message: String },
}

impl ConfigurationError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Failure of a start/stop transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Service '{service}' is already starting")]
    AlreadyStarting { service: String },

    #[error("Cannot {operation} service '{service}' while {state}")]
    InvalidState {
        service: String,
        state: String,
        operation: &'static str,
    },

    #[error("Service '{service}' failed to start: {reason}")]
    StartFailed { service: String, reason: String },

    #[error("Service '{service}' failed to stop: {reason}")]
    StopFailed { service: String, reason: String },

    #[error("Failed to acquire {resource}: {reason}")]
    Resource { resource: String, reason: String },
}

impl LifecycleError {
    pub fn start_failed(service: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::StartFailed {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    pub fn stop_failed(service: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::StopFailed {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    pub fn resource(resource: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Resource {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }
}

/// Any error surfaced synchronously by the engine
#[derive(Debug, Error)]
pub enum SwitchboardError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Shutdown in progress")]
    ShutdownInProgress,
}

// ============================================================================
// Routing-Domain Errors
// ============================================================================

/// Kind of a routing-domain failure
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    IllegalState,
    IllegalArgument,
    Io,
    Timeout,
    NoConsumers,
    Rejected,
    Custom(String),
}

impl ErrorKind {
    /// Stable name used in trace labels
    pub fn name(&self) -> &str {
        match self {
            ErrorKind::IllegalState => "IllegalStateError",
            ErrorKind::IllegalArgument => "IllegalArgumentError",
            ErrorKind::Io => "IoError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::NoConsumers => "NoConsumersError",
            ErrorKind::Rejected => "RejectedError",
            ErrorKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failure carried in an exchange's exception slot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ProcessingError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProcessingError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalState, message)
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalArgument, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }
}
