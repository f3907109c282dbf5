use std::fmt;

use async_trait::async_trait;
use sb_common::{Exchange, ProcessingError};

use super::Processor;
use crate::lifecycle::{Service, ServiceSupport};

/// Installs a preconfigured error into the exchange's exception slot.
///
/// Leaves the output untouched. Stateful only so that it participates in
/// the lifecycle of its pipeline; start and stop acquire nothing.
pub struct ThrowException {
    error: ProcessingError,
    support: ServiceSupport,
}

impl ThrowException {
    pub fn new(error: ProcessingError) -> Self {
        Self {
            error,
            support: ServiceSupport::new(),
        }
    }

    pub fn error(&self) -> &ProcessingError {
        &self.error
    }
}

impl fmt::Display for ThrowException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ThrowException")
    }
}

#[async_trait]
impl Processor for ThrowException {
    async fn process(&self, exchange: &mut Exchange) {
        exchange.set_exception(self.error.clone());
    }

    fn label(&self) -> String {
        format!("throwException[{}]", self.error.kind.name())
    }

    fn as_service(&self) -> Option<&dyn Service> {
        Some(self)
    }
}

#[async_trait]
impl Service for ThrowException {
    fn name(&self) -> &str {
        "throw-exception"
    }

    fn service_support(&self) -> &ServiceSupport {
        &self.support
    }
}
