//! Routes - a consumer on a from-endpoint feeding a pipeline

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sb_common::{Exchange, LifecycleError};
use tracing::{error, info};

use crate::endpoint::{Consumer, Endpoint};
use crate::lifecycle::{into_lifecycle, Service, ServiceSupport};
use crate::processor::{Pipeline, Processor};

/// Collaborator invoked when an exchange leaves a route's pipeline failed.
///
/// This is the designated error-handling step: it may replace or clear the
/// exception via `Exchange::replace_exception` / `take_exception`.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, route_id: &str, exchange: &mut Exchange);
}

/// Logs the failure and leaves the error on the exchange
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorHandler;

#[async_trait]
impl ErrorHandler for LoggingErrorHandler {
    async fn handle(&self, route_id: &str, exchange: &mut Exchange) {
        if let Some(err) = exchange.exception() {
            error!(
                route_id = %route_id,
                exchange_id = %exchange.id(),
                error_kind = %err.kind,
                error = %err.message,
                "Exchange failed"
            );
        }
    }
}

/// What the consumer invokes: the pipeline, then the error handler if needed
struct RouteProcessor {
    route_id: String,
    pipeline: Arc<Pipeline>,
    error_handler: Arc<dyn ErrorHandler>,
}

#[async_trait]
impl Processor for RouteProcessor {
    async fn process(&self, exchange: &mut Exchange) {
        self.pipeline.process(exchange).await;
        if exchange.is_failed() {
            self.error_handler.handle(&self.route_id, exchange).await;
        }
    }

    fn label(&self) -> String {
        format!("route[{}]", self.route_id)
    }
}

pub struct Route {
    id: String,
    from: Arc<dyn Endpoint>,
    pipeline: Arc<Pipeline>,
    error_handler: Arc<dyn ErrorHandler>,
    consumer: RwLock<Option<Arc<dyn Consumer>>>,
    support: ServiceSupport,
}

impl Route {
    pub fn new(id: impl Into<String>, from: Arc<dyn Endpoint>, pipeline: Pipeline) -> Self {
        Self {
            id: id.into(),
            from,
            pipeline: Arc::new(pipeline),
            error_handler: Arc::new(LoggingErrorHandler),
            consumer: RwLock::new(None),
            support: ServiceSupport::new(),
        }
    }

    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn from_uri(&self) -> &str {
        self.from.uri()
    }

    pub fn from_endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.from
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    async fn open_consumer(&self) -> Result<Arc<dyn Consumer>, LifecycleError> {
        self.from.start().await?;
        let processor = Arc::new(RouteProcessor {
            route_id: self.id.clone(),
            pipeline: self.pipeline.clone(),
            error_handler: self.error_handler.clone(),
        });
        let consumer = self
            .from
            .clone()
            .create_consumer(processor)
            .map_err(|e| into_lifecycle(&self.id, e))?;
        consumer.start().await?;
        Ok(consumer)
    }
}

#[async_trait]
impl Service for Route {
    fn name(&self) -> &str {
        &self.id
    }

    fn service_support(&self) -> &ServiceSupport {
        &self.support
    }

    /// Processors first, then the consumer, so nothing arrives before the
    /// pipeline can handle it
    async fn do_start(&self) -> Result<(), LifecycleError> {
        self.pipeline.start().await?;
        match self.open_consumer().await {
            Ok(consumer) => {
                *self.consumer.write() = Some(consumer);
                info!(route_id = %self.id, from = %self.from.uri(), "Route started");
                Ok(())
            }
            Err(e) => {
                let _ = self.pipeline.stop().await;
                Err(e)
            }
        }
    }

    async fn do_stop(&self) -> Result<(), LifecycleError> {
        let consumer = self.consumer.write().take();
        let consumer_result = match consumer {
            Some(consumer) => consumer.stop().await,
            None => Ok(()),
        };
        let pipeline_result = self.pipeline.stop().await;
        info!(route_id = %self.id, "Route stopped");
        consumer_result.and(pipeline_result)
    }
}
