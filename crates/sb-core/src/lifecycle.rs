//! Service lifecycle
//!
//! Shared start/stop state machine for components, endpoints, producers,
//! consumers and stateful processors:
//!
//! ```text
//! Uninitialized -> Starting -> Started -> Stopping -> Stopped
//!        any hook failure -> Failed
//! ```
//!
//! Connectors implement `do_start`/`do_stop`; callers use `start`/`stop`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use sb_common::{LifecycleError, SwitchboardError};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceState {
    #[default]
    Uninitialized,
    Starting,
    Started,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Uninitialized => "uninitialized",
            ServiceState::Starting => "starting",
            ServiceState::Started => "started",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// State holder driving the lifecycle transitions of one service
#[derive(Debug, Default)]
pub struct ServiceSupport {
    state: Mutex<ServiceState>,
}

impl ServiceSupport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    pub fn is_started(&self) -> bool {
        self.state() == ServiceState::Started
    }

    /// Run `hook` as the start transition.
    ///
    /// No-op when already started; fails when another start is in flight.
    /// A stopped or failed service may be started again.
    pub async fn start<F>(&self, name: &str, hook: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = Result<(), LifecycleError>>,
    {
        {
            let mut state = self.state.lock();
            match *state {
                ServiceState::Started => return Ok(()),
                ServiceState::Starting => {
                    return Err(LifecycleError::AlreadyStarting {
                        service: name.to_string(),
                    })
                }
                ServiceState::Stopping => {
                    return Err(LifecycleError::InvalidState {
                        service: name.to_string(),
                        state: state.to_string(),
                        operation: "start",
                    })
                }
                ServiceState::Uninitialized | ServiceState::Stopped | ServiceState::Failed => {
                    *state = ServiceState::Starting;
                }
            }
        }

        debug!(service = %name, "Starting service");
        let mut transition = Transition::new(&self.state);

        match hook.await {
            Ok(()) => {
                transition.complete(ServiceState::Started);
                debug!(service = %name, "Service started");
                Ok(())
            }
            Err(e) => {
                transition.complete(ServiceState::Failed);
                error!(service = %name, error = %e, "Service failed to start");
                Err(e)
            }
        }
    }

    /// Run `hook` as the stop transition.
    ///
    /// No-op when never started, already stopped or being stopped by another
    /// caller. A failed service is marked stopped without running the hook.
    pub async fn stop<F>(&self, name: &str, hook: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = Result<(), LifecycleError>>,
    {
        {
            let mut state = self.state.lock();
            match *state {
                ServiceState::Uninitialized | ServiceState::Stopped | ServiceState::Stopping => {
                    return Ok(())
                }
                ServiceState::Failed => {
                    *state = ServiceState::Stopped;
                    return Ok(());
                }
                ServiceState::Starting => {
                    return Err(LifecycleError::InvalidState {
                        service: name.to_string(),
                        state: state.to_string(),
                        operation: "stop",
                    })
                }
                ServiceState::Started => {
                    *state = ServiceState::Stopping;
                }
            }
        }

        debug!(service = %name, "Stopping service");
        let mut transition = Transition::new(&self.state);

        match hook.await {
            Ok(()) => {
                transition.complete(ServiceState::Stopped);
                debug!(service = %name, "Service stopped");
                Ok(())
            }
            Err(e) => {
                transition.complete(ServiceState::Failed);
                error!(service = %name, error = %e, "Service failed to stop");
                Err(e)
            }
        }
    }
}

/// Marks the service failed if a transition future is dropped mid-hook
struct Transition<'a> {
    state: &'a Mutex<ServiceState>,
    done: bool,
}

impl<'a> Transition<'a> {
    fn new(state: &'a Mutex<ServiceState>) -> Self {
        Self { state, done: false }
    }

    fn complete(&mut self, next: ServiceState) {
        *self.state.lock() = next;
        self.done = true;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.done {
            *self.state.lock() = ServiceState::Failed;
        }
    }
}

/// Anything with a start/stop lifecycle
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    fn service_support(&self) -> &ServiceSupport;

    /// Acquire external resources. Must release everything it acquired
    /// before returning an error.
    async fn do_start(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Release external resources
    async fn do_stop(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), LifecycleError> {
        self.service_support().start(self.name(), self.do_start()).await
    }

    async fn stop(&self) -> Result<(), LifecycleError> {
        self.service_support().stop(self.name(), self.do_stop()).await
    }

    fn state(&self) -> ServiceState {
        self.service_support().state()
    }
}

/// Stop every service, continuing past failures. Returns the failures.
pub async fn stop_all<S>(services: &[Arc<S>]) -> Vec<LifecycleError>
where
    S: Service + ?Sized,
{
    let mut failures = Vec::new();
    for service in services {
        if let Err(e) = service.stop().await {
            warn!(service = %service.name(), error = %e, "Stop failed, continuing with remaining services");
            failures.push(e);
        }
    }
    failures
}

/// Stop a service, giving up after `grace`.
///
/// Returns `false` when the service did not stop in time and was abandoned.
pub async fn stop_within<S>(service: &S, grace: Duration) -> bool
where
    S: Service + ?Sized,
{
    match tokio::time::timeout(grace, service.stop()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(service = %service.name(), error = %e, "Stop failed");
            true
        }
        Err(_) => {
            warn!(
                service = %service.name(),
                grace_ms = grace.as_millis() as u64,
                "Service did not stop within grace period, abandoning"
            );
            false
        }
    }
}

/// Collapse a construction error raised inside a lifecycle hook
pub(crate) fn into_lifecycle(service: &str, error: SwitchboardError) -> LifecycleError {
    match error {
        SwitchboardError::Lifecycle(e) => e,
        other => LifecycleError::start_failed(service, other),
    }
}

// ============================================================================
// Resource Scope
// ============================================================================

type Release = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), LifecycleError>> + Send>;

/// Tracks resources acquired during `do_start`.
///
/// If a later acquisition fails, `abort` releases everything acquired so
/// far in reverse order. `commit` hands the resources over to the service.
pub struct ResourceScope {
    owner: String,
    acquired: Vec<(String, Release)>,
}

impl ResourceScope {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            acquired: Vec::new(),
        }
    }

    /// Record an acquired resource together with how to release it
    pub fn acquired<F, Fut>(&mut self, resource: impl Into<String>, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), LifecycleError>> + Send + 'static,
    {
        self.acquired
            .push((resource.into(), Box::new(move || Box::pin(release()))));
    }

    pub fn len(&self) -> usize {
        self.acquired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acquired.is_empty()
    }

    /// Keep the resources; the service releases them in `do_stop`
    pub fn commit(mut self) {
        self.acquired.clear();
    }

    /// Release everything in reverse acquisition order
    pub async fn release_all(mut self) {
        let acquired = std::mem::take(&mut self.acquired);
        for (resource, release) in acquired.into_iter().rev() {
            match release().await {
                Ok(()) => debug!(owner = %self.owner, resource = %resource, "Released resource"),
                Err(e) => warn!(
                    owner = %self.owner,
                    resource = %resource,
                    error = %e,
                    "Failed to release resource"
                ),
            }
        }
    }

    /// Release everything, then hand back `error` for the caller to return
    pub async fn abort(self, error: LifecycleError) -> LifecycleError {
        self.release_all().await;
        error
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        if !self.acquired.is_empty() {
            let names: Vec<&str> = self.acquired.iter().map(|(n, _)| n.as_str()).collect();
            error!(
                owner = %self.owner,
                resources = ?names,
                "Resource scope dropped without commit or release"
            );
        }
    }
}
