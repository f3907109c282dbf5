use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sb_common::{Exchange, LifecycleError, ProcessingError};

use super::Processor;
use crate::endpoint::{Endpoint, Producer};
use crate::lifecycle::{into_lifecycle, Service, ServiceSupport};

/// Sends the exchange to an endpoint through a producer it owns.
///
/// The producer is created and started in `do_start` and stopped in
/// `do_stop`; processing before start fails the exchange.
pub struct SendProcessor {
    label: String,
    endpoint: Arc<dyn Endpoint>,
    producer: RwLock<Option<Arc<dyn Producer>>>,
    support: ServiceSupport,
}

impl SendProcessor {
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        Self {
            label: format!("sendTo[{}]", endpoint.uri()),
            endpoint,
            producer: RwLock::new(None),
            support: ServiceSupport::new(),
        }
    }

    pub fn endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.endpoint
    }
}

#[async_trait]
impl Processor for SendProcessor {
    async fn process(&self, exchange: &mut Exchange) {
        let producer = self.producer.read().clone();
        match producer {
            Some(producer) => producer.process(exchange).await,
            None => {
                exchange.set_exception(ProcessingError::illegal_state(format!(
                    "{} is not started",
                    self.label
                )));
            }
        }
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn as_service(&self) -> Option<&dyn Service> {
        Some(self)
    }
}

#[async_trait]
impl Service for SendProcessor {
    fn name(&self) -> &str {
        &self.label
    }

    fn service_support(&self) -> &ServiceSupport {
        &self.support
    }

    async fn do_start(&self) -> Result<(), LifecycleError> {
        self.endpoint.start().await?;
        let producer = self
            .endpoint
            .clone()
            .create_producer()
            .map_err(|e| into_lifecycle(&self.label, e))?;
        producer.start().await?;
        *self.producer.write() = Some(producer);
        Ok(())
    }

    async fn do_stop(&self) -> Result<(), LifecycleError> {
        let producer = self.producer.write().take();
        match producer {
            Some(producer) => producer.stop().await,
            None => Ok(()),
        }
    }
}
