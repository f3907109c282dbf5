//! `log:category` - producer that logs every exchange it receives

use std::sync::Arc;

use async_trait::async_trait;
use sb_common::{ConfigurationError, Exchange, SwitchboardError};
use sb_config::{EndpointConfiguration, ParameterSpec};
use sb_core::{
    Consumer, Endpoint, EndpointCore, EndpointRequest, EndpointStrategy, InflightCounter,
    Processor, Producer, Service, ServiceSupport,
};
use tracing::{debug, error, info, trace, warn, Level};

pub const SCHEME: &str = "log";

const PARAMETERS: &[ParameterSpec] = &[
    ParameterSpec::string("level").with_default("info"),
    ParameterSpec::boolean("showHeaders").with_default("false"),
    ParameterSpec::boolean("showBody").with_default("true"),
];

#[derive(Debug, Default, Clone, Copy)]
pub struct LogStrategy;

#[async_trait]
impl EndpointStrategy for LogStrategy {
    fn parameters(&self) -> &[ParameterSpec] {
        PARAMETERS
    }

    fn build(
        &self,
        request: EndpointRequest<'_>,
    ) -> Result<Option<Arc<dyn Endpoint>>, SwitchboardError> {
        Ok(Some(Arc::new(LogEndpoint::new(request.configuration)?)))
    }
}

fn parse_level(value: &str) -> Result<Level, ConfigurationError> {
    match value.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(ConfigurationError::InvalidValue {
            name: "level".to_string(),
            value: value.to_string(),
            expected: "one of trace, debug, info, warn, error",
        }),
    }
}

pub struct LogEndpoint {
    core: EndpointCore,
    category: String,
    level: Level,
    show_headers: bool,
    show_body: bool,
}

impl LogEndpoint {
    fn new(configuration: EndpointConfiguration) -> Result<Self, ConfigurationError> {
        let level = parse_level(configuration.string("level").unwrap_or("info"))?;
        Ok(Self {
            category: configuration.remaining_path().to_string(),
            level,
            show_headers: configuration.boolean("showHeaders").unwrap_or(false),
            show_body: configuration.boolean("showBody").unwrap_or(true),
            core: EndpointCore::new(configuration),
        })
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// `Exchange[Id: .., Headers: {..}, Body: ..]`
    pub fn format(&self, exchange: &Exchange) -> String {
        let message = exchange.current();
        let mut parts = vec![format!("Id: {}", exchange.id())];
        if self.show_headers {
            let headers: Vec<String> = message
                .headers()
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            parts.push(format!("Headers: {{{}}}", headers.join(", ")));
        }
        if self.show_body {
            let body = match message.body().as_text() {
                Some(text) => text.into_owned(),
                None => format!("<{} bytes>", message.body().to_bytes().len()),
            };
            parts.push(format!("Body: {}", body));
        }
        format!("Exchange[{}]", parts.join(", "))
    }
}

#[async_trait]
impl Service for LogEndpoint {
    fn name(&self) -> &str {
        self.core.uri()
    }

    fn service_support(&self) -> &ServiceSupport {
        self.core.support()
    }
}

impl Endpoint for LogEndpoint {
    fn uri(&self) -> &str {
        self.core.uri()
    }

    fn configuration(&self) -> &EndpointConfiguration {
        self.core.configuration()
    }

    fn create_producer(self: Arc<Self>) -> Result<Arc<dyn Producer>, SwitchboardError> {
        Ok(Arc::new(LogProducer {
            endpoint: self,
            support: ServiceSupport::new(),
        }))
    }

    fn create_consumer(
        self: Arc<Self>,
        _processor: Arc<dyn Processor>,
    ) -> Result<Arc<dyn Consumer>, SwitchboardError> {
        Err(ConfigurationError::invalid(format!(
            "cannot consume from {}: log endpoints are producer-only",
            self.uri()
        ))
        .into())
    }

    fn inflight(&self) -> &InflightCounter {
        self.core.inflight()
    }
}

pub struct LogProducer {
    endpoint: Arc<LogEndpoint>,
    support: ServiceSupport,
}

#[async_trait]
impl Processor for LogProducer {
    async fn process(&self, exchange: &mut Exchange) {
        let _inflight = self.endpoint.inflight().enter();
        let line = self.endpoint.format(exchange);
        let category = self.endpoint.category();
        match self.endpoint.level {
            Level::TRACE => trace!(category = %category, "{}", line),
            Level::DEBUG => debug!(category = %category, "{}", line),
            Level::INFO => info!(category = %category, "{}", line),
            Level::WARN => warn!(category = %category, "{}", line),
            _ => error!(category = %category, "{}", line),
        }
    }

    fn label(&self) -> String {
        format!("log[{}]", self.endpoint.category())
    }
}

#[async_trait]
impl Service for LogProducer {
    fn name(&self) -> &str {
        self.endpoint.uri()
    }

    fn service_support(&self) -> &ServiceSupport {
        &self.support
    }
}

impl Producer for LogProducer {
    fn endpoint_uri(&self) -> &str {
        self.endpoint.uri()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_common::Message;
    use sb_config::EndpointUri;

    fn endpoint(uri: &str) -> Result<LogEndpoint, SwitchboardError> {
        let parsed = EndpointUri::parse(uri)?;
        let configuration = EndpointConfiguration::new(&parsed, PARAMETERS, false)?;
        Ok(LogEndpoint::new(configuration)?)
    }

    #[test]
    fn test_format_defaults_to_body_only() {
        let endpoint = endpoint("log:orders").unwrap();
        let exchange = Exchange::in_only(Message::new("hello").with_header("tenant", "acme"));

        assert_eq!(endpoint.category(), "orders");
        assert_eq!(
            endpoint.format(&exchange),
            format!("Exchange[Id: {}, Body: hello]", exchange.id())
        );
    }

    #[test]
    fn test_format_with_headers_without_body() {
        let endpoint = endpoint("log:orders?showHeaders=true&showBody=false").unwrap();
        let exchange = Exchange::in_only(Message::new("hello").with_header("tenant", "acme"));

        assert_eq!(
            endpoint.format(&exchange),
            format!("Exchange[Id: {}, Headers: {{tenant=\"acme\"}}]", exchange.id())
        );
    }

    #[test]
    fn test_invalid_level() {
        let err = endpoint("log:orders?level=loud").err().unwrap();
        assert!(matches!(
            err,
            SwitchboardError::Configuration(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_producer_only() {
        let endpoint = Arc::new(endpoint("log:orders?level=debug").unwrap());
        let producer = endpoint.clone().create_producer().unwrap();
        let mut exchange = Exchange::in_only(Message::new("x"));
        producer.process(&mut exchange).await;
        assert!(!exchange.is_failed());

        let noop: Arc<dyn Processor> = producer_processor();
        assert!(endpoint.create_consumer(noop).is_err());
    }

    fn producer_processor() -> Arc<dyn Processor> {
        Arc::new(sb_core::FnProcessor::new("noop", |_ex: &mut Exchange| {}))
    }
}
