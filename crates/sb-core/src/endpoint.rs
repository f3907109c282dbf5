//! Endpoint, Producer and Consumer contracts
//!
//! An endpoint is identified by its normalized URI and owns a typed
//! configuration. Building one performs no I/O; transports connect when a
//! producer or consumer starts.

use std::sync::Arc;

use sb_common::SwitchboardError;
use sb_config::EndpointConfiguration;

use crate::inflight::InflightCounter;
use crate::lifecycle::{Service, ServiceSupport};
use crate::processor::Processor;

pub trait Endpoint: Service {
    /// Normalized URI, the cache identity
    fn uri(&self) -> &str;

    fn configuration(&self) -> &EndpointConfiguration;

    /// Whether parameters were delivered without percent-decoding
    fn is_raw(&self) -> bool {
        self.configuration().is_raw()
    }

    /// Build a producer sending exchanges to this endpoint. Not started.
    fn create_producer(self: Arc<Self>) -> Result<Arc<dyn Producer>, SwitchboardError>;

    /// Build a consumer feeding exchanges from this endpoint into `processor`. Not started.
    fn create_consumer(
        self: Arc<Self>,
        processor: Arc<dyn Processor>,
    ) -> Result<Arc<dyn Consumer>, SwitchboardError>;

    /// Exchanges currently being handled through this endpoint
    fn inflight(&self) -> &InflightCounter;
}

/// Sends exchanges to an endpoint. Started before first use.
pub trait Producer: Processor + Service {
    fn endpoint_uri(&self) -> &str;
}

/// Receives exchanges from an endpoint and hands them to a processor
pub trait Consumer: Service {
    fn endpoint_uri(&self) -> &str;
}

/// State every endpoint implementation carries
#[derive(Debug)]
pub struct EndpointCore {
    configuration: EndpointConfiguration,
    support: ServiceSupport,
    inflight: InflightCounter,
}

impl EndpointCore {
    pub fn new(configuration: EndpointConfiguration) -> Self {
        Self {
            configuration,
            support: ServiceSupport::new(),
            inflight: InflightCounter::new(),
        }
    }

    pub fn uri(&self) -> &str {
        self.configuration.normalized_uri()
    }

    pub fn configuration(&self) -> &EndpointConfiguration {
        &self.configuration
    }

    pub fn support(&self) -> &ServiceSupport {
        &self.support
    }

    pub fn inflight(&self) -> &InflightCounter {
        &self.inflight
    }
}
