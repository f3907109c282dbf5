//! Switchboard Components
//!
//! Reference connectors built on `DefaultComponent`:
//! - `direct`: synchronous in-process hand-off
//! - `queue`: bounded asynchronous in-process queue with worker tasks
//! - `log`: logs every exchange it receives
//! - `scp`: remote file upload over an application-supplied session transport

pub mod direct;
pub mod log;
pub mod queue;
pub mod scp;

use std::sync::Arc;

use sb_core::{Component, ComponentRegistry, DefaultComponent};

pub use direct::DirectStrategy;
pub use log::LogStrategy;
pub use queue::QueueStrategy;
pub use scp::{ScpSettings, ScpStrategy, SessionFactory};

/// Register the in-process connectors: `direct`, `queue` and `log`
pub fn register_components(registry: &ComponentRegistry) {
    registry.register(direct::SCHEME, |context| {
        let component: Arc<dyn Component> = Arc::new(DefaultComponent::new(
            direct::SCHEME,
            DirectStrategy,
            context.clone(),
        ));
        Ok(component)
    });
    registry.register(queue::SCHEME, |context| {
        let component: Arc<dyn Component> = Arc::new(DefaultComponent::new(
            queue::SCHEME,
            QueueStrategy,
            context.clone(),
        ));
        Ok(component)
    });
    registry.register(log::SCHEME, |context| {
        let component: Arc<dyn Component> =
            Arc::new(DefaultComponent::new(log::SCHEME, LogStrategy, context.clone()));
        Ok(component)
    });
}

/// Register `scp`. Settings come from `ScpSettings::bootstrap`, called once
/// by the application.
pub fn register_scp(
    registry: &ComponentRegistry,
    settings: Arc<ScpSettings>,
    factory: Arc<dyn SessionFactory>,
) {
    registry.register(scp::SCHEME, move |context| {
        let component: Arc<dyn Component> = Arc::new(scp::component(
            settings.clone(),
            factory.clone(),
            context.clone(),
        ));
        Ok(component)
    });
}
