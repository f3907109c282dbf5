//! `queue:name` - bounded asynchronous in-process queue
//!
//! One-way exchanges are enqueued as copies and the producer returns
//! immediately. Request-reply exchanges wait for a worker to finish the
//! copy, then take over its results; the wait is bounded by `timeout`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sb_common::{
    ConfigurationError, ErrorKind, Exchange, ExchangePattern, LifecycleError, ProcessingError,
    SwitchboardError,
};
use sb_config::{EndpointConfiguration, ParameterSpec};
use sb_core::{
    Consumer, Endpoint, EndpointCore, EndpointRequest, EndpointStrategy, InflightCounter,
    InflightGuard, Processor, Producer, Service, ServiceSupport,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const SCHEME: &str = "queue";

/// How often a waiting request-reply producer checks whether its caller gave up
const ABANDON_POLL_INTERVAL: Duration = Duration::from_millis(10);

const PARAMETERS: &[ParameterSpec] = &[
    ParameterSpec::integer("size")
        .with_default("1000")
        .describe("Maximum number of queued exchanges"),
    ParameterSpec::integer("concurrentConsumers")
        .with_default("1")
        .describe("Number of worker tasks"),
    ParameterSpec::duration("timeout")
        .with_default("30s")
        .describe("How long a request-reply producer waits"),
];

#[derive(Debug, Default, Clone, Copy)]
pub struct QueueStrategy;

#[async_trait]
impl EndpointStrategy for QueueStrategy {
    fn parameters(&self) -> &[ParameterSpec] {
        PARAMETERS
    }

    fn build(
        &self,
        request: EndpointRequest<'_>,
    ) -> Result<Option<Arc<dyn Endpoint>>, SwitchboardError> {
        Ok(Some(Arc::new(QueueEndpoint::new(request.configuration)?)))
    }
}

struct QueuedExchange {
    exchange: Exchange,
    reply: Option<oneshot::Sender<Exchange>>,
    _inflight: InflightGuard,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedExchange>>>;

pub struct QueueEndpoint {
    core: EndpointCore,
    capacity: usize,
    concurrent_consumers: usize,
    timeout: Duration,
    sender: mpsc::Sender<QueuedExchange>,
    receiver: SharedReceiver,
    consumer_attached: Mutex<bool>,
}

fn positive(configuration: &EndpointConfiguration, name: &str) -> Result<usize, ConfigurationError> {
    let value = configuration.integer(name).unwrap_or(1);
    if value < 1 {
        return Err(ConfigurationError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            expected: "a positive integer",
        });
    }
    Ok(value as usize)
}

impl QueueEndpoint {
    fn new(configuration: EndpointConfiguration) -> Result<Self, ConfigurationError> {
        let capacity = positive(&configuration, "size")?;
        let concurrent_consumers = positive(&configuration, "concurrentConsumers")?;
        let timeout = configuration
            .duration("timeout")
            .unwrap_or(Duration::from_secs(30));
        let (sender, receiver) = mpsc::channel(capacity);

        Ok(Self {
            core: EndpointCore::new(configuration),
            capacity,
            concurrent_consumers,
            timeout,
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            consumer_attached: Mutex::new(false),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn concurrent_consumers(&self) -> usize {
        self.concurrent_consumers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Exchanges waiting for a worker
    pub fn queued(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    fn enqueue(&self, item: QueuedExchange) -> Result<(), ProcessingError> {
        self.sender.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ProcessingError::new(
                ErrorKind::Rejected,
                format!("Queue full (capacity {}) on endpoint: {}", self.capacity, self.uri()),
            ),
            mpsc::error::TrySendError::Closed(_) => {
                ProcessingError::illegal_state(format!("Queue closed on endpoint: {}", self.uri()))
            }
        })
    }
}

#[async_trait]
impl Service for QueueEndpoint {
    fn name(&self) -> &str {
        self.core.uri()
    }

    fn service_support(&self) -> &ServiceSupport {
        self.core.support()
    }
}

impl Endpoint for QueueEndpoint {
    fn uri(&self) -> &str {
        self.core.uri()
    }

    fn configuration(&self) -> &EndpointConfiguration {
        self.core.configuration()
    }

    fn create_producer(self: Arc<Self>) -> Result<Arc<dyn Producer>, SwitchboardError> {
        Ok(Arc::new(QueueProducer {
            endpoint: self,
            support: ServiceSupport::new(),
        }))
    }

    fn create_consumer(
        self: Arc<Self>,
        processor: Arc<dyn Processor>,
    ) -> Result<Arc<dyn Consumer>, SwitchboardError> {
        Ok(Arc::new(QueueConsumer {
            endpoint: self,
            processor,
            support: ServiceSupport::new(),
            shutdown_tx: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }))
    }

    fn inflight(&self) -> &InflightCounter {
        self.core.inflight()
    }
}

pub struct QueueProducer {
    endpoint: Arc<QueueEndpoint>,
    support: ServiceSupport,
}

#[async_trait]
impl Processor for QueueProducer {
    async fn process(&self, exchange: &mut Exchange) {
        let endpoint = &self.endpoint;
        let copy = exchange.copy();

        if exchange.pattern() == ExchangePattern::InOnly {
            let item = QueuedExchange {
                exchange: copy,
                reply: None,
                _inflight: endpoint.inflight().enter(),
            };
            if let Err(err) = endpoint.enqueue(item) {
                exchange.set_exception(err);
            }
            return;
        }

        let abandon = copy.abandon_handle();
        let (reply_tx, reply_rx) = oneshot::channel();
        let item = QueuedExchange {
            exchange: copy,
            reply: Some(reply_tx),
            _inflight: endpoint.inflight().enter(),
        };
        if let Err(err) = endpoint.enqueue(item) {
            exchange.set_exception(err);
            return;
        }

        let caller = exchange.abandon_handle();
        let waited = tokio::time::timeout(endpoint.timeout(), async move {
            let mut reply_rx = reply_rx;
            let mut poll = tokio::time::interval(ABANDON_POLL_INTERVAL);
            loop {
                tokio::select! {
                    reply = &mut reply_rx => return Some(reply),
                    _ = poll.tick() => {
                        if caller.is_abandoned() {
                            return None;
                        }
                    }
                }
            }
        })
        .await;

        match waited {
            Ok(Some(Ok(done))) => exchange.copy_results_from(done),
            Ok(Some(Err(_))) => {
                exchange.set_exception(ProcessingError::illegal_state(format!(
                    "Exchange dropped before a reply on endpoint: {}",
                    endpoint.uri()
                )));
            }
            Ok(None) => {
                abandon.abandon();
                debug!(
                    uri = %endpoint.uri(),
                    exchange_id = %exchange.id(),
                    "Caller abandoned exchange, no longer waiting for reply"
                );
            }
            Err(_) => {
                abandon.abandon();
                warn!(
                    uri = %endpoint.uri(),
                    exchange_id = %exchange.id(),
                    timeout_ms = endpoint.timeout().as_millis() as u64,
                    "No reply within timeout, exchange abandoned"
                );
                exchange.set_exception(ProcessingError::timeout(format!(
                    "No reply within {:?} on endpoint: {}",
                    endpoint.timeout(),
                    endpoint.uri()
                )));
            }
        }
    }

    fn label(&self) -> String {
        format!("queue[{}]", self.endpoint.uri())
    }
}

#[async_trait]
impl Service for QueueProducer {
    fn name(&self) -> &str {
        self.endpoint.uri()
    }

    fn service_support(&self) -> &ServiceSupport {
        &self.support
    }
}

impl Producer for QueueProducer {
    fn endpoint_uri(&self) -> &str {
        self.endpoint.uri()
    }
}

/// Worker tasks draining the queue into a processor
pub struct QueueConsumer {
    endpoint: Arc<QueueEndpoint>,
    processor: Arc<dyn Processor>,
    support: ServiceSupport,
    shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueConsumer {
    fn spawn_worker(&self, index: usize, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let receiver = self.endpoint.receiver.clone();
        let processor = self.processor.clone();
        let uri = self.endpoint.uri().to_string();

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(uri = %uri, worker = index, "Queue worker shutting down");
                        break;
                    }
                    next = async { receiver.lock().await.recv().await } => next,
                };

                let Some(item) = next else {
                    break;
                };
                let QueuedExchange {
                    mut exchange,
                    reply,
                    _inflight,
                } = item;

                if exchange.is_abandoned() {
                    debug!(uri = %uri, exchange_id = %exchange.id(), "Skipping abandoned exchange");
                    continue;
                }

                exchange.set_from_endpoint(uri.as_str());
                processor.process(&mut exchange).await;

                if let Some(reply) = reply {
                    let _ = reply.send(exchange);
                }
            }
        })
    }
}

#[async_trait]
impl Service for QueueConsumer {
    fn name(&self) -> &str {
        self.endpoint.uri()
    }

    fn service_support(&self) -> &ServiceSupport {
        &self.support
    }

    async fn do_start(&self) -> Result<(), LifecycleError> {
        {
            let mut attached = self.endpoint.consumer_attached.lock();
            if *attached {
                return Err(LifecycleError::start_failed(
                    self.endpoint.uri(),
                    "a consumer is already attached to this queue",
                ));
            }
            *attached = true;
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let workers: Vec<JoinHandle<()>> = (0..self.endpoint.concurrent_consumers())
            .map(|index| self.spawn_worker(index, shutdown_tx.subscribe()))
            .collect();

        info!(
            uri = %self.endpoint.uri(),
            workers = workers.len(),
            "Queue consumer started"
        );
        *self.workers.lock() = workers;
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        Ok(())
    }

    /// Signal workers and wait for them to finish their current exchange
    async fn do_stop(&self) -> Result<(), LifecycleError> {
        if let Some(shutdown_tx) = self.shutdown_tx.lock().take() {
            let _ = shutdown_tx.send(());
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
        *self.endpoint.consumer_attached.lock() = false;
        info!(uri = %self.endpoint.uri(), queued = self.endpoint.queued(), "Queue consumer stopped");
        Ok(())
    }
}

impl Consumer for QueueConsumer {
    fn endpoint_uri(&self) -> &str {
        self.endpoint.uri()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_common::Message;
    use sb_core::{Component, ComponentContext, DefaultComponent, FnProcessor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn component() -> DefaultComponent<QueueStrategy> {
        DefaultComponent::new(SCHEME, QueueStrategy, ComponentContext::default())
    }

    #[tokio::test]
    async fn test_defaults() {
        let config = component().create_configuration("queue:jobs").unwrap();
        assert_eq!(config.integer("size"), Some(1000));
        assert_eq!(config.integer("concurrentConsumers"), Some(1));
        assert_eq!(config.duration("timeout"), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_zero_size_rejected() {
        let err = component().create_endpoint("queue:jobs?size=0").await.err().unwrap();
        assert!(matches!(
            err,
            SwitchboardError::Configuration(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_request_reply_resumes_with_results() {
        let endpoint = component().create_endpoint("queue:jobs").await.unwrap();
        let consumer = endpoint
            .clone()
            .create_consumer(Arc::new(FnProcessor::new("reply", |ex: &mut Exchange| {
                let text = ex.current().body().as_text().unwrap_or_default().to_string();
                ex.set_output(Message::new(format!("done:{}", text)));
                ex.set_property("worker", "queue");
            })))
            .unwrap();
        consumer.start().await.unwrap();
        let producer = endpoint.create_producer().unwrap();

        let mut exchange = Exchange::in_out(Message::new("job-1"));
        let id = exchange.id().to_string();
        producer.process(&mut exchange).await;

        assert_eq!(exchange.id(), id);
        assert_eq!(exchange.output().unwrap().body().as_text().as_deref(), Some("done:job-1"));
        assert_eq!(exchange.property("worker").and_then(|v| v.as_str()), Some("queue"));

        consumer.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_in_only_returns_before_processing() {
        let processed = Arc::new(AtomicUsize::new(0));
        let endpoint = component().create_endpoint("queue:events").await.unwrap();
        let producer = endpoint.clone().create_producer().unwrap();

        let mut exchange = Exchange::in_only(Message::new("event"));
        producer.process(&mut exchange).await;
        assert!(exchange.output().is_none());
        assert!(!exchange.is_failed());
        assert_eq!(endpoint.inflight().current(), 1);

        let counter = processed.clone();
        let consumer = endpoint
            .clone()
            .create_consumer(Arc::new(FnProcessor::new("count", move |_ex: &mut Exchange| {
                counter.fetch_add(1, Ordering::SeqCst);
            })))
            .unwrap();
        consumer.start().await.unwrap();

        assert!(endpoint.inflight().wait_idle(Duration::from_secs(2)).await);
        assert_eq!(processed.load(Ordering::SeqCst), 1);
        consumer.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let endpoint = component().create_endpoint("queue:tiny?size=1").await.unwrap();
        let producer = endpoint.create_producer().unwrap();

        let mut first = Exchange::in_only(Message::new("1"));
        producer.process(&mut first).await;
        let mut second = Exchange::in_only(Message::new("2"));
        producer.process(&mut second).await;

        assert!(!first.is_failed());
        assert_eq!(second.exception().unwrap().kind, ErrorKind::Rejected);
    }

    #[tokio::test]
    async fn test_request_reply_times_out() {
        let endpoint = component()
            .create_endpoint("queue:slow?timeout=50ms")
            .await
            .unwrap();
        let producer = endpoint.create_producer().unwrap();

        let mut exchange = Exchange::in_out(Message::new("job"));
        producer.process(&mut exchange).await;

        assert_eq!(exchange.exception().unwrap().kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_request_reply_stops_waiting_when_caller_abandons() {
        let endpoint = component()
            .create_endpoint("queue:pending?timeout=2s")
            .await
            .unwrap();
        let producer = endpoint.clone().create_producer().unwrap();

        let mut exchange = Exchange::in_out(Message::new("job"));
        let caller = exchange.abandon_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            caller.abandon();
        });

        let started = std::time::Instant::now();
        producer.process(&mut exchange).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(exchange.is_abandoned());
        assert!(exchange.exception().is_none());
        assert!(exchange.output().is_none());

        // The queued copy is skipped once a consumer attaches
        let processed = Arc::new(AtomicUsize::new(0));
        let counter = processed.clone();
        let consumer = endpoint
            .clone()
            .create_consumer(Arc::new(FnProcessor::new("count", move |_ex: &mut Exchange| {
                counter.fetch_add(1, Ordering::SeqCst);
            })))
            .unwrap();
        consumer.start().await.unwrap();

        assert!(endpoint.inflight().wait_idle(Duration::from_secs(2)).await);
        assert_eq!(processed.load(Ordering::SeqCst), 0);
        consumer.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_workers_stop_on_signal() {
        let endpoint = component()
            .create_endpoint("queue:jobs?concurrentConsumers=3")
            .await
            .unwrap();
        let consumer = endpoint
            .clone()
            .create_consumer(Arc::new(FnProcessor::new("noop", |_ex: &mut Exchange| {})))
            .unwrap();

        consumer.start().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), consumer.stop())
            .await
            .unwrap()
            .unwrap();

        // A new consumer may attach after the previous one stopped
        let again = endpoint
            .create_consumer(Arc::new(FnProcessor::new("noop", |_ex: &mut Exchange| {})))
            .unwrap();
        again.start().await.unwrap();
        again.stop().await.unwrap();
    }
}
