use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sb_common::{ConfigurationError, Exchange, LifecycleError, ProcessingError, SwitchboardError};
use sb_config::EndpointConfiguration;
use sb_core::{
    Consumer, Endpoint, EndpointCore, InflightCounter, Processor, Producer, ResourceScope,
    Service, ServiceSupport,
};
use tracing::{debug, info};

use super::configuration::ScpTarget;
use super::session::{SessionFactory, SessionTracker, TrackedSession};

/// Header naming the remote file when the endpoint has no `fileName`
pub const FILE_NAME_HEADER: &str = "fileName";

/// Upload target. Holds no session itself; sessions belong to producers.
pub struct ScpEndpoint {
    core: EndpointCore,
    target: ScpTarget,
    factory: Arc<dyn SessionFactory>,
    tracker: Arc<SessionTracker>,
}

impl ScpEndpoint {
    pub(crate) fn new(
        configuration: EndpointConfiguration,
        target: ScpTarget,
        factory: Arc<dyn SessionFactory>,
        tracker: Arc<SessionTracker>,
    ) -> Self {
        Self {
            core: EndpointCore::new(configuration),
            target,
            factory,
            tracker,
        }
    }

    pub fn target(&self) -> &ScpTarget {
        &self.target
    }
}

#[async_trait]
impl Service for ScpEndpoint {
    fn name(&self) -> &str {
        self.core.uri()
    }

    fn service_support(&self) -> &ServiceSupport {
        self.core.support()
    }
}

impl Endpoint for ScpEndpoint {
    fn uri(&self) -> &str {
        self.core.uri()
    }

    fn configuration(&self) -> &EndpointConfiguration {
        self.core.configuration()
    }

    fn create_producer(self: Arc<Self>) -> Result<Arc<dyn Producer>, SwitchboardError> {
        Ok(Arc::new(ScpProducer {
            label: format!("scp[{}]", self.target.address()),
            endpoint: self,
            session: RwLock::new(None),
            support: ServiceSupport::new(),
        }))
    }

    fn create_consumer(
        self: Arc<Self>,
        _processor: Arc<dyn Processor>,
    ) -> Result<Arc<dyn Consumer>, SwitchboardError> {
        Err(ConfigurationError::invalid(format!(
            "cannot consume from {}: scp endpoints are producer-only",
            self.uri()
        ))
        .into())
    }

    fn inflight(&self) -> &InflightCounter {
        self.core.inflight()
    }
}

/// Uploads the body of each exchange as one remote file
pub struct ScpProducer {
    label: String,
    endpoint: Arc<ScpEndpoint>,
    session: RwLock<Option<TrackedSession>>,
    support: ServiceSupport,
}

impl ScpProducer {
    fn remote_path(&self, exchange: &Exchange) -> String {
        let file_name = match &self.endpoint.target.file_name {
            Some(name) => name.clone(),
            None => exchange
                .current()
                .header_str(FILE_NAME_HEADER)
                .map(|name| name.into_owned())
                .unwrap_or_else(|| exchange.id().to_string()),
        };
        format!("{}/{}", self.endpoint.target.directory, file_name)
    }

    pub fn is_connected(&self) -> bool {
        self.session.read().is_some()
    }
}

#[async_trait]
impl Processor for ScpProducer {
    async fn process(&self, exchange: &mut Exchange) {
        let tracked = self.session.read().clone();
        let Some(tracked) = tracked else {
            exchange.set_exception(ProcessingError::illegal_state(format!(
                "{} is not started",
                self.label
            )));
            return;
        };

        let _inflight = self.endpoint.inflight().enter();
        let path = self.remote_path(exchange);
        let contents = exchange.current().body().to_bytes();
        let size = contents.len();
        let result = {
            let mut session = tracked.session.lock().await;
            session
                .send_file(&path, self.endpoint.target.chmod, contents)
                .await
        };

        match result {
            Ok(()) => debug!(
                address = %tracked.address,
                path = %path,
                bytes = size,
                exchange_id = %exchange.id(),
                "Uploaded file"
            ),
            Err(e) => {
                exchange.set_exception(ProcessingError::io(format!(
                    "Failed to upload {} to {}: {:#}",
                    path, tracked.address, e
                )));
            }
        }
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

#[async_trait]
impl Service for ScpProducer {
    fn name(&self) -> &str {
        &self.label
    }

    fn service_support(&self) -> &ServiceSupport {
        &self.support
    }

    async fn do_start(&self) -> Result<(), LifecycleError> {
        let target = &self.endpoint.target;
        let address = target.address();
        let mut scope = ResourceScope::new(self.label.as_str());

        let connected =
            tokio::time::timeout(target.connect_timeout, self.endpoint.factory.connect(target))
                .await;
        let session = match connected {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                return Err(LifecycleError::resource(
                    format!("session {}", address),
                    format!("{:#}", e),
                ))
            }
            Err(_) => {
                return Err(LifecycleError::resource(
                    format!("session {}", address),
                    format!("connect timed out after {:?}", target.connect_timeout),
                ))
            }
        };

        let tracked = self.endpoint.tracker.track(address.as_str(), session);
        let tracker = self.endpoint.tracker.clone();
        let id = tracked.id;
        scope.acquired(format!("session {}", address), move || async move {
            tracker.close(id).await
        });

        let prepared = {
            let mut session = tracked.session.lock().await;
            session.ensure_directory(&target.directory).await
        };
        if let Err(e) = prepared {
            let error = LifecycleError::resource(
                format!("directory {} on {}", target.directory, address),
                format!("{:#}", e),
            );
            return Err(scope.abort(error).await);
        }

        scope.commit();
        *self.session.write() = Some(tracked);
        info!(
            address = %address,
            directory = %target.directory,
            "SCP session opened"
        );
        Ok(())
    }

    async fn do_stop(&self) -> Result<(), LifecycleError> {
        let tracked = self.session.write().take();
        if let Some(tracked) = tracked {
            self.endpoint.tracker.close(tracked.id).await?;
            info!(address = %tracked.address, "SCP session closed");
        }
        Ok(())
    }
}

impl Producer for ScpProducer {
    fn endpoint_uri(&self) -> &str {
        self.endpoint.uri()
    }
}
