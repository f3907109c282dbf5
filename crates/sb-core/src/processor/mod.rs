//! Processors - composable steps over an exchange
//!
//! A processor never returns a routing-domain error. It either writes an
//! output message or puts a `ProcessingError` into the exchange's exception
//! slot, then returns normally. The exchange may be resumed on another task
//! between steps, so failures must be data rather than control flow.

use async_trait::async_trait;
use sb_common::Exchange;

use crate::lifecycle::Service;

mod log;
mod pipeline;
mod send;
mod throw_exception;

pub use log::LogProcessor;
pub use pipeline::Pipeline;
pub use send::SendProcessor;
pub use throw_exception::ThrowException;

#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, exchange: &mut Exchange);

    /// Stable, human-readable label for diagnostics
    fn label(&self) -> String {
        "processor".to_string()
    }

    /// Lifecycle of stateful processors; stateless ones return `None`
    fn as_service(&self) -> Option<&dyn Service> {
        None
    }
}

type StepFn = dyn Fn(&mut Exchange) + Send + Sync;

/// Processor backed by a closure
pub struct FnProcessor {
    label: String,
    step: Box<StepFn>,
}

impl FnProcessor {
    pub fn new<F>(label: impl Into<String>, step: F) -> Self
    where
        F: Fn(&mut Exchange) + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            step: Box::new(step),
        }
    }
}

#[async_trait]
impl Processor for FnProcessor {
    async fn process(&self, exchange: &mut Exchange) {
        (self.step)(exchange);
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_common::Message;

    #[tokio::test]
    async fn test_fn_processor() {
        let upper = FnProcessor::new("upper", |exchange: &mut Exchange| {
            let text = exchange.current().body().as_text().unwrap_or_default().to_uppercase();
            exchange.set_output(Message::new(text));
        });

        let mut exchange = Exchange::in_out(Message::new("shop"));
        upper.process(&mut exchange).await;

        assert_eq!(upper.label(), "upper");
        assert!(upper.as_service().is_none());
        assert_eq!(exchange.output().unwrap().body().as_text().as_deref(), Some("SHOP"));
    }
}
