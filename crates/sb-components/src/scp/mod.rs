//! `scp://[user@]host[:port]/directory` - upload exchange bodies as remote files
//!
//! Endpoint construction only derives an [`ScpTarget`]. The session is opened
//! when a producer starts and closed when it stops; whatever is still open
//! when the component stops is closed within the grace period.

mod configuration;
mod producer;
mod session;

pub use configuration::{ScpSettings, ScpTarget, DEFAULT_PORT};
pub use producer::{ScpEndpoint, ScpProducer, FILE_NAME_HEADER};
pub use session::{
    log_session_event, ScpSession, SessionFactory, SessionLogLevel, SessionTracker,
    SharedSession, TrackedSession,
};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sb_common::{LifecycleError, SwitchboardError};
use sb_config::ParameterSpec;
use sb_core::{ComponentContext, DefaultComponent, Endpoint, EndpointRequest, EndpointStrategy};
use tracing::{info, warn};

pub const SCHEME: &str = "scp";

pub struct ScpStrategy {
    settings: Arc<ScpSettings>,
    factory: Arc<dyn SessionFactory>,
    tracker: Arc<SessionTracker>,
}

impl ScpStrategy {
    pub fn new(settings: Arc<ScpSettings>, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            settings,
            factory,
            tracker: Arc::new(SessionTracker::new()),
        }
    }

    pub fn settings(&self) -> &ScpSettings {
        &self.settings
    }

    pub fn open_sessions(&self) -> usize {
        self.tracker.open_sessions()
    }
}

#[async_trait]
impl EndpointStrategy for ScpStrategy {
    fn parameters(&self) -> &[ParameterSpec] {
        configuration::PARAMETERS
    }

    /// Credentials may contain `%`, `+` or `&` and are decoded by the target
    fn use_raw_uri(&self) -> bool {
        true
    }

    fn build(
        &self,
        request: EndpointRequest<'_>,
    ) -> Result<Option<Arc<dyn Endpoint>>, SwitchboardError> {
        let target = ScpTarget::from_uri(request.uri, &request.configuration, &self.settings)?;
        Ok(Some(Arc::new(ScpEndpoint::new(
            request.configuration,
            target,
            self.factory.clone(),
            self.tracker.clone(),
        ))))
    }

    async fn shutdown(&self, grace: Duration) -> Result<(), LifecycleError> {
        let open = self.tracker.open_sessions();
        if open == 0 {
            return Ok(());
        }
        info!(sessions = open, "Closing remaining SCP sessions");
        let abandoned = self.tracker.close_all(grace).await;
        if abandoned > 0 {
            warn!(abandoned = abandoned, "SCP sessions abandoned at shutdown");
        }
        Ok(())
    }
}

/// The scp component, with host-key policy from [`ScpSettings::bootstrap`]
pub fn component(
    settings: Arc<ScpSettings>,
    factory: Arc<dyn SessionFactory>,
    context: ComponentContext,
) -> DefaultComponent<ScpStrategy> {
    DefaultComponent::new(SCHEME, ScpStrategy::new(settings, factory), context)
}
