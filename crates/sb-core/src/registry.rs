//! Component registry
//!
//! Explicit scheme -> factory table. A component is built and started the
//! first time its scheme is resolved; concurrent first resolutions share one
//! construction.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use sb_common::{LifecycleError, ResolutionError, SwitchboardError};
use sb_config::EndpointUri;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::component::{Component, ComponentContext};
use crate::endpoint::Endpoint;
use crate::lifecycle::stop_all;

/// Builds the component for one scheme
pub type ComponentFactory =
    Arc<dyn Fn(&ComponentContext) -> Result<Arc<dyn Component>, SwitchboardError> + Send + Sync>;

type ComponentCell = Arc<OnceCell<Arc<dyn Component>>>;

pub struct ComponentRegistry {
    context: ComponentContext,
    factories: RwLock<HashMap<String, ComponentFactory>>,
    components: DashMap<String, ComponentCell>,
}

impl ComponentRegistry {
    pub fn new(context: ComponentContext) -> Self {
        Self {
            context,
            factories: RwLock::new(HashMap::new()),
            components: DashMap::new(),
        }
    }

    pub fn context(&self) -> &ComponentContext {
        &self.context
    }

    /// Register the factory for `scheme`, replacing any previous one.
    /// Components already resolved are unaffected.
    pub fn register<F>(&self, scheme: &str, factory: F)
    where
        F: Fn(&ComponentContext) -> Result<Arc<dyn Component>, SwitchboardError>
            + Send
            + Sync
            + 'static,
    {
        let scheme = scheme.to_ascii_lowercase();
        debug!(scheme = %scheme, "Registered component factory");
        self.factories.write().insert(scheme, Arc::new(factory));
    }

    /// Register a prebuilt component under its own scheme. It is started on
    /// first resolution like any other.
    pub fn register_instance(&self, component: Arc<dyn Component>) {
        let scheme = component.scheme().to_string();
        self.register(&scheme, move |_| Ok(component.clone()));
    }

    pub fn is_registered(&self, scheme: &str) -> bool {
        self.factories
            .read()
            .contains_key(&scheme.to_ascii_lowercase())
    }

    /// Registered schemes, sorted
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.factories.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// The started component for `scheme`, building it on first use
    pub async fn resolve(&self, scheme: &str) -> Result<Arc<dyn Component>, SwitchboardError> {
        let scheme = scheme.to_ascii_lowercase();

        let cached = self
            .components
            .get(&scheme)
            .and_then(|cell| cell.get().cloned());
        if let Some(component) = cached {
            return Ok(component);
        }

        let factory = self.factories.read().get(&scheme).cloned();
        let Some(factory) = factory else {
            return Err(ResolutionError::UnknownScheme { scheme }.into());
        };

        let cell = self
            .components
            .entry(scheme.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| async {
                let component = factory(&self.context)?;
                component.start().await?;
                info!(scheme = %scheme, "Component resolved");
                Ok::<_, SwitchboardError>(component)
            })
            .await;

        match result {
            Ok(component) => Ok(component.clone()),
            Err(e) => {
                self.components
                    .remove_if(&scheme, |_, c| Arc::ptr_eq(c, &cell) && !c.initialized());
                warn!(scheme = %scheme, error = %e, "Component resolution failed");
                Err(e)
            }
        }
    }

    /// Resolve the component for the scheme of `uri`, then the endpoint
    pub async fn resolve_endpoint(&self, uri: &str) -> Result<Arc<dyn Endpoint>, SwitchboardError> {
        let parsed = EndpointUri::parse(uri)?;
        let component = self.resolve(parsed.scheme()).await?;
        component.create_endpoint(uri).await
    }

    /// A component already resolved for `scheme`
    pub fn component(&self, scheme: &str) -> Option<Arc<dyn Component>> {
        self.components
            .get(&scheme.to_ascii_lowercase())
            .and_then(|cell| cell.get().cloned())
    }

    /// Every resolved component
    pub fn resolved(&self) -> Vec<Arc<dyn Component>> {
        self.components
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }

    /// Stop every resolved component, best effort, and forget them.
    /// Factories stay registered so schemes can be resolved again.
    pub async fn stop_all(&self) -> Vec<LifecycleError> {
        let components = self.resolved();
        self.components.clear();
        let failures = stop_all(&components).await;
        info!(
            components = components.len(),
            failures = failures.len(),
            "Stopped components"
        );
        failures
    }
}
