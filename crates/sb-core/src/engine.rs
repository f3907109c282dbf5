//! Engine - owns the registry, routes and producers of one application
//!
//! Shutdown order: routes, then cached producers, then components (each
//! component drains and stops its own endpoints).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use sb_common::{
    Body, ConfigurationError, Exchange, ExchangePattern, LifecycleError, Message, SwitchboardError,
    Value,
};
use sb_config::{normalize_uri, EngineConfig};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::component::{Component, ComponentContext};
use crate::endpoint::{Endpoint, Producer};
use crate::lifecycle::{stop_within, Service, ServiceState, ServiceSupport};
use crate::processor::{Pipeline, SendProcessor};
use crate::registry::ComponentRegistry;
use crate::route::Route;

type ProducerCell = Arc<OnceCell<Arc<dyn Producer>>>;

pub struct Engine {
    config: Arc<EngineConfig>,
    registry: Arc<ComponentRegistry>,
    routes: RwLock<Vec<Arc<Route>>>,
    producers: DashMap<String, ProducerCell>,
    support: ServiceSupport,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(ComponentRegistry::new(ComponentContext::new(config.clone())));
        Self {
            config,
            registry,
            routes: RwLock::new(Vec::new()),
            producers: DashMap::new(),
            support: ServiceSupport::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    fn ensure_accepting(&self) -> Result<(), SwitchboardError> {
        match self.state() {
            ServiceState::Stopping => Err(SwitchboardError::ShutdownInProgress),
            _ => Ok(()),
        }
    }

    pub async fn component(&self, scheme: &str) -> Result<Arc<dyn Component>, SwitchboardError> {
        self.registry.resolve(scheme).await
    }

    /// Resolve and start the endpoint for `uri`
    pub async fn endpoint(&self, uri: &str) -> Result<Arc<dyn Endpoint>, SwitchboardError> {
        self.ensure_accepting()?;
        let endpoint = self.registry.resolve_endpoint(uri).await?;
        endpoint.start().await?;
        Ok(endpoint)
    }

    /// Stop and evict the endpoint for `uri` from its component
    pub async fn remove_endpoint(&self, uri: &str) -> Result<bool, SwitchboardError> {
        let key = normalize_uri(uri)?;
        if let Some((_, cell)) = self.producers.remove(&key) {
            if let Some(producer) = cell.get() {
                let _ = producer.stop().await;
            }
        }
        let scheme = match key.split_once(':') {
            Some((scheme, _)) => scheme,
            None => return Ok(false),
        };
        match self.registry.component(scheme) {
            Some(component) => component.remove_endpoint(uri).await,
            None => Ok(false),
        }
    }

    /// A processor sending to `uri`, for use as a pipeline step
    pub async fn to(&self, uri: &str) -> Result<SendProcessor, SwitchboardError> {
        Ok(SendProcessor::new(self.endpoint(uri).await?))
    }

    /// Build a route consuming from `from_uri`. Not added or started.
    pub async fn build_route(
        &self,
        id: impl Into<String>,
        from_uri: &str,
        pipeline: Pipeline,
    ) -> Result<Route, SwitchboardError> {
        let from = self.endpoint(from_uri).await?;
        Ok(Route::new(id, from, pipeline))
    }

    /// Add a route; it is started right away when the engine is running
    pub async fn add_route(&self, route: Route) -> Result<Arc<Route>, SwitchboardError> {
        self.ensure_accepting()?;
        let route = Arc::new(route);
        {
            let mut routes = self.routes.write();
            if routes.iter().any(|r| r.id() == route.id()) {
                return Err(ConfigurationError::invalid(format!(
                    "route '{}' already exists",
                    route.id()
                ))
                .into());
            }
            routes.push(route.clone());
        }

        if self.support.is_started() {
            if let Err(e) = route.start().await {
                self.routes.write().retain(|r| !Arc::ptr_eq(r, &route));
                return Err(e.into());
            }
        }
        info!(route_id = %route.id(), from = %route.from_uri(), "Route added");
        Ok(route)
    }

    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.routes.read().clone()
    }

    pub fn route(&self, id: &str) -> Option<Arc<Route>> {
        self.routes.read().iter().find(|r| r.id() == id).cloned()
    }

    /// Stop and remove a route. Returns whether it existed.
    pub async fn remove_route(&self, id: &str) -> Result<bool, SwitchboardError> {
        let route = {
            let mut routes = self.routes.write();
            match routes.iter().position(|r| r.id() == id) {
                Some(index) => routes.remove(index),
                None => return Ok(false),
            }
        };
        route.stop().await?;
        info!(route_id = %id, "Route removed");
        Ok(true)
    }

    /// Started producer for `uri`, created once per normalized URI
    pub async fn producer(&self, uri: &str) -> Result<Arc<dyn Producer>, SwitchboardError> {
        self.ensure_accepting()?;
        let key = normalize_uri(uri)?;

        let cached = self.producers.get(&key).and_then(|cell| cell.get().cloned());
        if let Some(producer) = cached {
            return Ok(producer);
        }

        let cell = self
            .producers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| async {
                let endpoint = self.endpoint(uri).await?;
                let producer = endpoint.create_producer()?;
                producer.start().await?;
                Ok::<_, SwitchboardError>(producer)
            })
            .await;

        match result {
            Ok(producer) => Ok(producer.clone()),
            Err(e) => {
                self.producers
                    .remove_if(&key, |_, c| Arc::ptr_eq(c, &cell) && !c.initialized());
                Err(e)
            }
        }
    }

    /// Send an exchange to `uri` and hand it back once the producer is done.
    ///
    /// Routing failures are carried in the returned exchange's exception
    /// slot; `Err` means the endpoint could not be resolved or started.
    pub async fn send(&self, uri: &str, mut exchange: Exchange) -> Result<Exchange, SwitchboardError> {
        let producer = self.producer(uri).await?;
        producer.process(&mut exchange).await;
        Ok(exchange)
    }

    /// Fire-and-forget send of a body with headers
    pub async fn send_body(
        &self,
        uri: &str,
        body: impl Into<Body>,
        headers: Vec<(String, Value)>,
    ) -> Result<Exchange, SwitchboardError> {
        self.send(uri, build_exchange(ExchangePattern::InOnly, body.into(), headers))
            .await
    }

    /// Request-reply send of a body; the reply is the exchange's output
    pub async fn request_body(
        &self,
        uri: &str,
        body: impl Into<Body>,
    ) -> Result<Exchange, SwitchboardError> {
        self.send(uri, build_exchange(ExchangePattern::InOut, body.into(), Vec::new()))
            .await
    }

    /// Start, wait for Ctrl+C or SIGTERM, then stop
    pub async fn run_until_shutdown(&self) -> Result<(), SwitchboardError> {
        self.start().await?;
        let routes = self.routes.read().len();
        info!(engine = %self.config.name, routes = routes, "Engine running");
        shutdown_signal().await;
        info!("Shutdown signal received...");
        self.stop().await?;
        Ok(())
    }
}

fn build_exchange(pattern: ExchangePattern, body: Body, headers: Vec<(String, Value)>) -> Exchange {
    let mut message = Message::new(body);
    for (name, value) in headers {
        message.set_header(name, value);
    }
    Exchange::new(pattern, message)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[async_trait]
impl Service for Engine {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn service_support(&self) -> &ServiceSupport {
        &self.support
    }

    /// Start routes in order; on failure stop the ones already started
    async fn do_start(&self) -> Result<(), LifecycleError> {
        let routes = self.routes();
        for (index, route) in routes.iter().enumerate() {
            if let Err(e) = route.start().await {
                for started in routes[..index].iter().rev() {
                    let _ = started.stop().await;
                }
                return Err(e);
            }
        }
        info!(engine = %self.config.name, routes = routes.len(), "Engine started");
        Ok(())
    }

    async fn do_stop(&self) -> Result<(), LifecycleError> {
        let grace = self.config.shutdown_timeout();

        for route in self.routes().iter().rev() {
            stop_within(route.as_ref(), grace).await;
        }

        let producers: Vec<Arc<dyn Producer>> = self
            .producers
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect();
        self.producers.clear();
        for producer in &producers {
            stop_within(producer.as_ref(), grace).await;
        }

        let failures = self.registry.stop_all().await;
        if !failures.is_empty() {
            warn!(
                engine = %self.config.name,
                failures = failures.len(),
                "Some components failed to stop"
            );
        }
        info!(engine = %self.config.name, "Engine stopped");
        Ok(())
    }
}
