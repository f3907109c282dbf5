//! Components - one per URI scheme, building and caching endpoints
//!
//! Connectors do not subclass a base component. They supply an
//! `EndpointStrategy` and `DefaultComponent` runs the generic algorithm:
//! parse, check scheme, validate parameters, build, cache by normalized URI.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use sb_common::{LifecycleError, ResolutionError, SwitchboardError};
use sb_config::{toml, EndpointConfiguration, EndpointUri, EngineConfig, ParameterSpec};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::lifecycle::{stop_within, Service, ServiceState, ServiceSupport};

/// Process-wide context shared by every component. Components hold a
/// reference; the engine owns it.
#[derive(Debug, Clone, Default)]
pub struct ComponentContext {
    config: Arc<EngineConfig>,
}

impl ComponentContext {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Grace period for draining endpoints on stop
    pub fn shutdown_timeout(&self) -> Duration {
        self.config.shutdown_timeout()
    }

    /// `[components.<scheme>]` table from the engine config
    pub fn settings(&self, scheme: &str) -> Option<&toml::Table> {
        self.config.component(scheme)
    }
}

#[async_trait]
pub trait Component: Service {
    fn scheme(&self) -> &str;

    /// When true, parameter values reach the component still percent-encoded
    fn use_raw_uri(&self) -> bool {
        false
    }

    /// Validate and type the parameters of `uri` without building an endpoint
    fn create_configuration(&self, uri: &str) -> Result<EndpointConfiguration, SwitchboardError>;

    /// Resolve `uri` to an endpoint, constructing it at most once per
    /// normalized URI
    async fn create_endpoint(&self, uri: &str) -> Result<Arc<dyn Endpoint>, SwitchboardError>;

    /// Endpoints currently cached
    fn endpoints(&self) -> Vec<Arc<dyn Endpoint>>;

    /// Stop and evict the cached endpoint for `uri`. Returns whether one existed.
    async fn remove_endpoint(&self, uri: &str) -> Result<bool, SwitchboardError>;
}

/// Input handed to `EndpointStrategy::build`
pub struct EndpointRequest<'a> {
    pub uri: &'a EndpointUri,
    pub configuration: EndpointConfiguration,
    pub context: &'a ComponentContext,
}

/// Connector-supplied part of endpoint construction
#[async_trait]
pub trait EndpointStrategy: Send + Sync + 'static {
    /// Parameters accepted in the query string
    fn parameters(&self) -> &[ParameterSpec];

    fn use_raw_uri(&self) -> bool {
        false
    }

    /// Build an endpoint. `Ok(None)` declines the URI. Must not perform I/O.
    fn build(
        &self,
        request: EndpointRequest<'_>,
    ) -> Result<Option<Arc<dyn Endpoint>>, SwitchboardError>;

    /// Called once when the component starts
    async fn initialize(&self, _context: &ComponentContext) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Called after all endpoints have been stopped
    async fn shutdown(&self, _grace: Duration) -> Result<(), LifecycleError> {
        Ok(())
    }
}

/// Parse `uri` and validate it for a component of `scheme`
pub fn build_configuration(
    scheme: &str,
    raw: bool,
    specs: &[ParameterSpec],
    uri: &str,
) -> Result<(EndpointUri, EndpointConfiguration), SwitchboardError> {
    let parsed = EndpointUri::parse(uri)?;
    if parsed.scheme() != scheme {
        return Err(ResolutionError::SchemeMismatch {
            scheme: scheme.to_string(),
            uri: uri.to_string(),
        }
        .into());
    }
    let configuration = EndpointConfiguration::new(&parsed, specs, raw)?;
    Ok((parsed, configuration))
}

/// Build an endpoint with `strategy`, turning a decline into a `ResolutionError`
pub fn build_endpoint<S: EndpointStrategy + ?Sized>(
    scheme: &str,
    strategy: &S,
    context: &ComponentContext,
    uri: &str,
) -> Result<Arc<dyn Endpoint>, SwitchboardError> {
    let (parsed, configuration) =
        build_configuration(scheme, strategy.use_raw_uri(), strategy.parameters(), uri)?;
    let request = EndpointRequest {
        uri: &parsed,
        configuration,
        context,
    };
    strategy.build(request)?.ok_or_else(|| {
        ResolutionError::Declined {
            uri: uri.to_string(),
        }
        .into()
    })
}

type EndpointCell = Arc<OnceCell<Arc<dyn Endpoint>>>;

/// Generic component: endpoint cache plus lifecycle around a strategy
pub struct DefaultComponent<S: EndpointStrategy> {
    scheme: String,
    strategy: S,
    context: ComponentContext,
    endpoints: DashMap<String, EndpointCell>,
    support: ServiceSupport,
}

impl<S: EndpointStrategy> DefaultComponent<S> {
    pub fn new(scheme: impl Into<String>, strategy: S, context: ComponentContext) -> Self {
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            strategy,
            context,
            endpoints: DashMap::new(),
            support: ServiceSupport::new(),
        }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn context(&self) -> &ComponentContext {
        &self.context
    }

    fn cache_key(&self, uri: &str) -> Result<String, SwitchboardError> {
        let parsed = EndpointUri::parse(uri)?;
        if parsed.scheme() != self.scheme {
            return Err(ResolutionError::SchemeMismatch {
                scheme: self.scheme.clone(),
                uri: uri.to_string(),
            }
            .into());
        }
        Ok(parsed.normalized())
    }
}

#[async_trait]
impl<S: EndpointStrategy> Component for DefaultComponent<S> {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn use_raw_uri(&self) -> bool {
        self.strategy.use_raw_uri()
    }

    fn create_configuration(&self, uri: &str) -> Result<EndpointConfiguration, SwitchboardError> {
        build_configuration(
            &self.scheme,
            self.strategy.use_raw_uri(),
            self.strategy.parameters(),
            uri,
        )
        .map(|(_, configuration)| configuration)
    }

    async fn create_endpoint(&self, uri: &str) -> Result<Arc<dyn Endpoint>, SwitchboardError> {
        if self.state() == ServiceState::Stopping {
            return Err(SwitchboardError::ShutdownInProgress);
        }

        let key = self.cache_key(uri)?;

        // Initialized entries are served without waiting
        let cached = self.endpoints.get(&key).and_then(|cell| cell.get().cloned());
        if let Some(endpoint) = cached {
            return Ok(endpoint);
        }

        let cell = self
            .endpoints
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| async {
                let endpoint = build_endpoint(&self.scheme, &self.strategy, &self.context, uri)?;
                info!(scheme = %self.scheme, uri = %endpoint.uri(), "Created endpoint");
                Ok::<_, SwitchboardError>(endpoint)
            })
            .await;

        match result {
            Ok(endpoint) => Ok(endpoint.clone()),
            Err(e) => {
                self.endpoints
                    .remove_if(&key, |_, c| Arc::ptr_eq(c, &cell) && !c.initialized());
                debug!(scheme = %self.scheme, uri = %uri, error = %e, "Endpoint construction failed");
                Err(e)
            }
        }
    }

    fn endpoints(&self) -> Vec<Arc<dyn Endpoint>> {
        self.endpoints
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }

    async fn remove_endpoint(&self, uri: &str) -> Result<bool, SwitchboardError> {
        let key = self.cache_key(uri)?;
        let Some((_, cell)) = self.endpoints.remove(&key) else {
            return Ok(false);
        };
        match cell.get() {
            Some(endpoint) => {
                stop_within(endpoint.as_ref(), self.context.shutdown_timeout()).await;
                info!(scheme = %self.scheme, uri = %key, "Evicted endpoint");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl<S: EndpointStrategy> Service for DefaultComponent<S> {
    fn name(&self) -> &str {
        &self.scheme
    }

    fn service_support(&self) -> &ServiceSupport {
        &self.support
    }

    async fn do_start(&self) -> Result<(), LifecycleError> {
        self.strategy.initialize(&self.context).await?;
        info!(scheme = %self.scheme, "Component started");
        Ok(())
    }

    /// Drain and stop every endpoint within the grace period, then shut the strategy down
    async fn do_stop(&self) -> Result<(), LifecycleError> {
        let grace = self.context.shutdown_timeout();
        let start = Instant::now();

        for endpoint in self.endpoints() {
            let remaining = grace.saturating_sub(start.elapsed());
            if !endpoint.inflight().wait_idle(remaining).await {
                warn!(
                    scheme = %self.scheme,
                    uri = %endpoint.uri(),
                    inflight = endpoint.inflight().current(),
                    "In-flight exchanges did not finish within grace period"
                );
            }
            let remaining = grace.saturating_sub(start.elapsed());
            stop_within(endpoint.as_ref(), remaining).await;
        }
        self.endpoints.clear();

        let remaining = grace.saturating_sub(start.elapsed());
        self.strategy.shutdown(remaining).await?;
        info!(scheme = %self.scheme, "Component stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Consumer, EndpointCore, Producer};
    use crate::inflight::InflightCounter;
    use crate::processor::Processor;
    use sb_common::ConfigurationError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubEndpoint {
        core: EndpointCore,
    }

    #[async_trait]
    impl Service for StubEndpoint {
        fn name(&self) -> &str {
            self.core.uri()
        }

        fn service_support(&self) -> &ServiceSupport {
            self.core.support()
        }
    }

    impl Endpoint for StubEndpoint {
        fn uri(&self) -> &str {
            self.core.uri()
        }

        fn configuration(&self) -> &EndpointConfiguration {
            self.core.configuration()
        }

        fn create_producer(self: Arc<Self>) -> Result<Arc<dyn Producer>, SwitchboardError> {
            Err(LifecycleError::start_failed(self.core.uri(), "no producer").into())
        }

        fn create_consumer(
            self: Arc<Self>,
            _processor: Arc<dyn Processor>,
        ) -> Result<Arc<dyn Consumer>, SwitchboardError> {
            Err(LifecycleError::start_failed(self.core.uri(), "no consumer").into())
        }

        fn inflight(&self) -> &InflightCounter {
            self.core.inflight()
        }
    }

    #[derive(Default)]
    struct StubStrategy {
        builds: AtomicUsize,
    }

    const STUB_PARAMS: &[ParameterSpec] = &[
        ParameterSpec::string("host").required(),
        ParameterSpec::integer("port").with_default("22"),
    ];

    #[async_trait]
    impl EndpointStrategy for StubStrategy {
        fn parameters(&self) -> &[ParameterSpec] {
            STUB_PARAMS
        }

        fn build(
            &self,
            request: EndpointRequest<'_>,
        ) -> Result<Option<Arc<dyn Endpoint>>, SwitchboardError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if request.uri.remaining_path() == "declined" {
                return Ok(None);
            }
            Ok(Some(Arc::new(StubEndpoint {
                core: EndpointCore::new(request.configuration),
            })))
        }
    }

    fn component() -> DefaultComponent<StubStrategy> {
        DefaultComponent::new("stub", StubStrategy::default(), ComponentContext::default())
    }

    #[tokio::test]
    async fn test_same_normalized_uri_returns_same_endpoint() {
        let component = component();
        let a = component
            .create_endpoint("stub:orders?host=a&port=1")
            .await
            .unwrap();
        let b = component
            .create_endpoint("stub://orders?port=1&host=a")
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(component.strategy().builds.load(Ordering::SeqCst), 1);
        assert_eq!(component.endpoints().len(), 1);
    }

    #[tokio::test]
    async fn test_declined_uri_is_resolution_error() {
        let component = component();
        let err = component.create_endpoint("stub:declined?host=a").await.err().unwrap();

        assert!(matches!(
            err,
            SwitchboardError::Resolution(ResolutionError::Declined { .. })
        ));
        assert!(component.endpoints().is_empty());
    }

    #[tokio::test]
    async fn test_scheme_mismatch() {
        let component = component();
        let err = component.create_endpoint("other:orders?host=a").await.err().unwrap();
        assert!(matches!(
            err,
            SwitchboardError::Resolution(ResolutionError::SchemeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_construction_is_not_cached() {
        let component = component();
        let err = component.create_endpoint("stub:orders").await.err().unwrap();
        assert!(matches!(
            err,
            SwitchboardError::Configuration(ConfigurationError::MissingParameter { .. })
        ));
        assert!(component.endpoints.is_empty());

        component.create_endpoint("stub:orders?host=a").await.unwrap();
        assert_eq!(component.endpoints().len(), 1);
    }

    #[test]
    fn test_create_configuration_applies_defaults() {
        let component = component();
        let config = component.create_configuration("stub:orders?host=a").unwrap();

        assert_eq!(config.string("host"), Some("a"));
        assert_eq!(config.integer("port"), Some(22));
        assert!(!config.is_raw());
    }

    #[tokio::test]
    async fn test_stop_stops_and_clears_endpoints() {
        let component = component();
        component.start().await.unwrap();
        let endpoint = component.create_endpoint("stub:orders?host=a").await.unwrap();
        endpoint.start().await.unwrap();

        component.stop().await.unwrap();

        assert_eq!(endpoint.state(), ServiceState::Stopped);
        assert!(component.endpoints().is_empty());
    }

    #[tokio::test]
    async fn test_remove_endpoint() {
        let component = component();
        let endpoint = component.create_endpoint("stub:orders?host=a").await.unwrap();
        endpoint.start().await.unwrap();

        assert!(component.remove_endpoint("stub:orders?host=a").await.unwrap());
        assert!(!component.remove_endpoint("stub:orders?host=a").await.unwrap());
        assert_eq!(endpoint.state(), ServiceState::Stopped);
    }
}
