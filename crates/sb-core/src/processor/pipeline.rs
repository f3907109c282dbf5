use std::sync::Arc;

use async_trait::async_trait;
use sb_common::{Exchange, LifecycleError};
use tracing::debug;

use super::Processor;
use crate::lifecycle::{Service, ServiceSupport};

/// Ordered, short-circuiting sequence of processors.
///
/// Before each step the exception slot is checked; once it holds an error
/// the remaining steps are skipped and the exchange is handed back as the
/// last step left it. An abandoned exchange stops the same way.
pub struct Pipeline {
    steps: Vec<Arc<dyn Processor>>,
    support: ServiceSupport,
}

impl Pipeline {
    pub fn new(steps: Vec<Arc<dyn Processor>>) -> Self {
        Self {
            steps,
            support: ServiceSupport::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Append a step
    pub fn then<P: Processor + 'static>(mut self, step: P) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn push(&mut self, step: Arc<dyn Processor>) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Arc<dyn Processor>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[async_trait]
impl Processor for Pipeline {
    async fn process(&self, exchange: &mut Exchange) {
        for (index, step) in self.steps.iter().enumerate() {
            if let Some(err) = exchange.exception() {
                debug!(
                    exchange_id = %exchange.id(),
                    stopped_before = %step.label(),
                    step = index,
                    error = %err,
                    "Exception set, skipping remaining steps"
                );
                return;
            }
            if exchange.is_abandoned() {
                debug!(
                    exchange_id = %exchange.id(),
                    step = index,
                    "Exchange abandoned, skipping remaining steps"
                );
                return;
            }
            step.process(exchange).await;
        }
    }

    fn label(&self) -> String {
        let labels: Vec<String> = self.steps.iter().map(|s| s.label()).collect();
        format!("pipeline[{}]", labels.join(" -> "))
    }

    fn as_service(&self) -> Option<&dyn Service> {
        Some(self)
    }
}

#[async_trait]
impl Service for Pipeline {
    fn name(&self) -> &str {
        "pipeline"
    }

    fn service_support(&self) -> &ServiceSupport {
        &self.support
    }

    /// Start stateful steps in order; on failure stop the ones already started
    async fn do_start(&self) -> Result<(), LifecycleError> {
        let mut started: Vec<&dyn Service> = Vec::new();
        for step in &self.steps {
            let Some(service) = step.as_service() else {
                continue;
            };
            if let Err(e) = service.start().await {
                for done in started.into_iter().rev() {
                    let _ = done.stop().await;
                }
                return Err(e);
            }
            started.push(service);
        }
        Ok(())
    }

    /// Stop stateful steps in reverse order, best effort
    async fn do_stop(&self) -> Result<(), LifecycleError> {
        let mut first_error = None;
        for step in self.steps.iter().rev() {
            if let Some(service) = step.as_service() {
                if let Err(e) = service.stop().await {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
