//! `direct:name` - synchronous in-process hand-off to a single consumer

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sb_common::{ErrorKind, Exchange, LifecycleError, ProcessingError, SwitchboardError};
use sb_config::{EndpointConfiguration, ParameterSpec};
use sb_core::{
    Consumer, Endpoint, EndpointCore, EndpointRequest, EndpointStrategy, InflightCounter,
    Processor, Producer, Service, ServiceSupport,
};
use tracing::debug;

pub const SCHEME: &str = "direct";

const PARAMETERS: &[ParameterSpec] = &[ParameterSpec::boolean("failIfNoConsumers")
    .with_default("true")
    .describe("Fail the exchange when no consumer is attached")];

#[derive(Debug, Default, Clone, Copy)]
pub struct DirectStrategy;

#[async_trait]
impl EndpointStrategy for DirectStrategy {
    fn parameters(&self) -> &[ParameterSpec] {
        PARAMETERS
    }

    fn build(
        &self,
        request: EndpointRequest<'_>,
    ) -> Result<Option<Arc<dyn Endpoint>>, SwitchboardError> {
        Ok(Some(Arc::new(DirectEndpoint::new(request.configuration))))
    }
}

pub struct DirectEndpoint {
    core: EndpointCore,
    fail_if_no_consumers: bool,
    consumer: RwLock<Option<Arc<dyn Processor>>>,
}

impl DirectEndpoint {
    fn new(configuration: EndpointConfiguration) -> Self {
        let fail_if_no_consumers = configuration.boolean("failIfNoConsumers").unwrap_or(true);
        Self {
            core: EndpointCore::new(configuration),
            fail_if_no_consumers,
            consumer: RwLock::new(None),
        }
    }

    pub fn has_consumer(&self) -> bool {
        self.consumer.read().is_some()
    }
}

#[async_trait]
impl Service for DirectEndpoint {
    fn name(&self) -> &str {
        self.core.uri()
    }

    fn service_support(&self) -> &ServiceSupport {
        self.core.support()
    }
}

impl Endpoint for DirectEndpoint {
    fn uri(&self) -> &str {
        self.core.uri()
    }

    fn configuration(&self) -> &EndpointConfiguration {
        self.core.configuration()
    }

    fn create_producer(self: Arc<Self>) -> Result<Arc<dyn Producer>, SwitchboardError> {
        Ok(Arc::new(DirectProducer {
            endpoint: self,
            support: ServiceSupport::new(),
        }))
    }

    fn create_consumer(
        self: Arc<Self>,
        processor: Arc<dyn Processor>,
    ) -> Result<Arc<dyn Consumer>, SwitchboardError> {
        Ok(Arc::new(DirectConsumer {
            endpoint: self,
            processor,
            support: ServiceSupport::new(),
        }))
    }

    fn inflight(&self) -> &InflightCounter {
        self.core.inflight()
    }
}

pub struct DirectProducer {
    endpoint: Arc<DirectEndpoint>,
    support: ServiceSupport,
}

#[async_trait]
impl Processor for DirectProducer {
    async fn process(&self, exchange: &mut Exchange) {
        let consumer = self.endpoint.consumer.read().clone();
        let Some(consumer) = consumer else {
            if self.endpoint.fail_if_no_consumers {
                exchange.set_exception(ProcessingError::new(
                    ErrorKind::NoConsumers,
                    format!("No consumers available on endpoint: {}", self.endpoint.uri()),
                ));
            } else {
                debug!(uri = %self.endpoint.uri(), exchange_id = %exchange.id(), "No consumers, dropping exchange");
            }
            return;
        };

        let _inflight = self.endpoint.inflight().enter();
        exchange.set_from_endpoint(self.endpoint.uri());
        consumer.process(exchange).await;
    }

    fn label(&self) -> String {
        format!("direct[{}]", self.endpoint.uri())
    }
}

#[async_trait]
impl Service for DirectProducer {
    fn name(&self) -> &str {
        self.endpoint.uri()
    }

    fn service_support(&self) -> &ServiceSupport {
        &self.support
    }
}

impl Producer for DirectProducer {
    fn endpoint_uri(&self) -> &str {
        self.endpoint.uri()
    }
}

pub struct DirectConsumer {
    endpoint: Arc<DirectEndpoint>,
    processor: Arc<dyn Processor>,
    support: ServiceSupport,
}

#[async_trait]
impl Service for DirectConsumer {
    fn name(&self) -> &str {
        self.endpoint.uri()
    }

    fn service_support(&self) -> &ServiceSupport {
        &self.support
    }

    async fn do_start(&self) -> Result<(), LifecycleError> {
        let mut slot = self.endpoint.consumer.write();
        if slot.is_some() {
            return Err(LifecycleError::start_failed(
                self.endpoint.uri(),
                "a consumer is already attached to this endpoint",
            ));
        }
        *slot = Some(self.processor.clone());
        Ok(())
    }

    async fn do_stop(&self) -> Result<(), LifecycleError> {
        let mut slot = self.endpoint.consumer.write();
        if slot.as_ref().is_some_and(|p| Arc::ptr_eq(p, &self.processor)) {
            *slot = None;
        }
        Ok(())
    }
}

impl Consumer for DirectConsumer {
    fn endpoint_uri(&self) -> &str {
        self.endpoint.uri()
    }
}
