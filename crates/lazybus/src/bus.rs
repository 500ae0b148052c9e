//! The bus: topic registry, publish path and dispatch start-up.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BusConfig;
use crate::consumer::{Consumer, Handler};
use crate::error::{BoxError, BusError};
use crate::failure::{self, DroppedMessage, FailureHook};
use crate::metrics::{BusSnapshot, TopicStats};
use crate::producer::{MessageStream, Producer};
use crate::topic::Topic;
use crate::worker::{wait_for_shutdown, DispatchWorker};

/// Structural state guarded by the registry lock.
#[derive(Default)]
struct Registry {
    topics: HashMap<String, Arc<Topic>>,
    /// Topics whose workers are already running.
    dispatching: HashSet<String>,
    /// Runtime captured by the first `listen`. Workers are spawned on it, so
    /// later registrations start their own workers from any thread.
    runtime: Option<Handle>,
    workers: Vec<JoinHandle<()>>,
}

impl Registry {
    /// Get the entry for `name`, creating its queue with `capacity` if needed.
    fn topic_or_create(&mut self, name: &str, capacity: usize) -> Arc<Topic> {
        if let Some(topic) = self.topics.get(name) {
            return Arc::clone(topic);
        }
        debug!(topic = %name, capacity, "creating topic queue");
        let topic = Arc::new(Topic::new(name, capacity));
        self.topics.insert(name.to_string(), Arc::clone(&topic));
        topic
    }
}

/// In-process publish/subscribe bus.
///
/// Every topic has one bounded FIFO queue and at most one consumer. Once
/// [`listen`](Bus::listen) has been called, `worker_pool` dispatch workers per
/// topic drain the queue and invoke the consumer.
///
/// The registry lock only covers structural changes (creating a queue,
/// replacing a consumer). Enqueueing happens outside it, so a full queue on
/// one topic only stalls publishers of that topic.
///
/// Share it across tasks with `Arc<Bus>`. Dropping the bus stops its workers.
///
/// # Example
/// ```ignore
/// let bus = Arc::new(Bus::builder().max_message(1000).worker_pool(5).build());
/// bus.register_consumer("orders", |id, message| async move {
///     let order: Order = serde_json::from_reader(message)?;
///     tracing::info!(%id, ?order, "order received");
///     Ok::<(), BoxError>(())
/// })?;
/// bus.listen()?;
/// bus.publish("orders", Producer::json(order)).await?;
/// ```
pub struct Bus {
    config: BusConfig,
    registry: Mutex<Registry>,
    failure_hook: FailureHook,
    shutdown: watch::Sender<bool>,
}

impl Bus {
    /// Create a bus with the default failure hook (log and drop).
    pub fn new(config: BusConfig) -> Self {
        Self::with_failure_hook(config, failure::default_hook())
    }

    pub fn builder() -> BusBuilder {
        BusBuilder::new()
    }

    fn with_failure_hook(config: BusConfig, failure_hook: FailureHook) -> Self {
        let config = config.normalized();
        let (shutdown, _) = watch::channel(false);
        info!(
            max_message = config.max_message,
            worker_pool = config.worker_pool,
            "bus created"
        );
        Self {
            config,
            registry: Mutex::new(Registry::default()),
            failure_hook,
            shutdown,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Register an async closure as the consumer of `topic`.
    ///
    /// Replaces any previous consumer; workers pick up the new one from the
    /// next dequeued message. If the bus is already listening and `topic` has
    /// no workers yet, they are started immediately on the runtime `listen`
    /// was called from. Callable from any thread.
    pub fn register_consumer<F, Fut>(
        &self,
        topic: impl Into<String>,
        handler: F,
    ) -> Result<(), BusError>
    where
        F: Fn(Uuid, MessageStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.install(topic.into(), Consumer::from_fn(handler))
    }

    /// Register a [`Handler`] implementation as the consumer of `topic`.
    ///
    /// Same semantics as [`register_consumer`](Bus::register_consumer).
    pub fn register_handler(
        &self,
        topic: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Result<(), BusError> {
        self.install(topic.into(), Consumer::new(handler))
    }

    fn install(&self, topic: String, consumer: Consumer) -> Result<(), BusError> {
        let mut registry = self.lock_registry();
        // Checked under the lock: `shutdown_and_join` takes the worker
        // handles while holding it, so nothing spawned here can be missed.
        if self.is_shut_down() {
            return Err(BusError::ShutDown);
        }

        let entry = registry.topic_or_create(&topic, self.config.max_message);
        let replaced = entry.set_consumer(consumer);
        if let Some(runtime) = registry.runtime.clone() {
            self.start_workers(&mut registry, &runtime, &entry);
        }

        info!(topic = %topic, replaced, "consumer registered");
        Ok(())
    }

    /// Enqueue `producer` on `topic`.
    ///
    /// Creates the topic queue if it does not exist yet, then fails with
    /// [`BusError::UnregisteredConsumer`] when no consumer is registered (the
    /// queue stays, empty). When the queue is full this waits for space; it
    /// never drops. Returns [`BusError::ShutDown`] if the bus is shut down
    /// before or while waiting.
    pub async fn publish(&self, topic: &str, producer: Producer) -> Result<(), BusError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Err(BusError::ShutDown);
        }

        let entry = self
            .lock_registry()
            .topic_or_create(topic, self.config.max_message);

        if !entry.has_consumer() {
            debug!(topic = %topic, "publish rejected: no consumer registered");
            return Err(BusError::UnregisteredConsumer(topic.to_string()));
        }

        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => Err(BusError::ShutDown),
            sent = entry.send(producer) => {
                sent.map_err(|_| BusError::ShutDown)?;
                entry.counters().record_published();
                debug!(topic = %topic, queued = entry.len(), "message enqueued");
                Ok(())
            }
        }
    }

    /// Start dispatch for every topic that has a consumer.
    ///
    /// Idempotent: topics already dispatching are skipped. After the first
    /// call, consumers registered for new topics start their workers on
    /// registration. Fails with [`BusError::NoRuntime`] outside a Tokio
    /// runtime; the runtime of the first call hosts every worker.
    pub fn listen(&self) -> Result<(), BusError> {
        let mut registry = self.lock_registry();
        if self.is_shut_down() {
            return Err(BusError::ShutDown);
        }

        let runtime = match &registry.runtime {
            Some(runtime) => runtime.clone(),
            None => {
                let runtime = Handle::try_current().map_err(|_| BusError::NoRuntime)?;
                registry.runtime = Some(runtime.clone());
                runtime
            }
        };

        let ready: Vec<Arc<Topic>> = registry
            .topics
            .values()
            .filter(|topic| topic.has_consumer())
            .cloned()
            .collect();
        for topic in &ready {
            self.start_workers(&mut registry, &runtime, topic);
        }

        info!(
            topics = registry.dispatching.len(),
            workers_per_topic = self.config.worker_pool,
            "bus listening"
        );
        Ok(())
    }

    fn start_workers(&self, registry: &mut Registry, runtime: &Handle, topic: &Arc<Topic>) {
        if !registry.dispatching.insert(topic.name().to_string()) {
            return;
        }
        for index in 0..self.config.worker_pool {
            let worker = DispatchWorker::new(
                Arc::clone(topic),
                index,
                Arc::clone(&self.failure_hook),
                self.shutdown.subscribe(),
            );
            registry.workers.push(worker.spawn(runtime));
        }
        info!(
            topic = %topic.name(),
            workers = self.config.worker_pool,
            "dispatch started"
        );
    }

    /// Messages currently waiting in `topic`'s queue; 0 for unknown topics.
    pub fn queue_length(&self, topic: &str) -> usize {
        self.lock_registry()
            .topics
            .get(topic)
            .map_or(0, |entry| entry.len())
    }

    /// Fixed capacity of `topic`'s queue; 0 for unknown topics.
    pub fn queue_capacity(&self, topic: &str) -> usize {
        self.lock_registry()
            .topics
            .get(topic)
            .map_or(0, |entry| entry.capacity())
    }

    /// Names of all topics with a queue, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_registry().topics.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_listening(&self) -> bool {
        self.lock_registry().runtime.is_some()
    }

    /// Number of dispatch workers spawned so far, across all topics.
    pub fn worker_count(&self) -> usize {
        self.lock_registry().workers.len()
    }

    pub fn topic_stats(&self, topic: &str) -> Option<TopicStats> {
        self.lock_registry().topics.get(topic).map(|entry| entry.stats())
    }

    pub fn snapshot(&self) -> BusSnapshot {
        self.lock_registry()
            .topics
            .iter()
            .map(|(name, entry)| (name.clone(), entry.stats()))
            .collect()
    }

    /// Signal every dispatch worker to stop.
    ///
    /// Workers finish the message they are processing, then exit. Queued
    /// messages are discarded. Pending and future publishes and registrations
    /// fail with [`BusError::ShutDown`].
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("bus shutting down");
        }
    }

    /// [`shutdown`](Bus::shutdown), then wait for every worker task to end.
    pub async fn shutdown_and_join(&self) {
        let workers = {
            let mut registry = self.lock_registry();
            self.shutdown();
            std::mem::take(&mut registry.workers)
        };
        let count = workers.len();
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatch worker ended abnormally");
            }
        }
        info!(workers = count, "bus stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

// ── BusBuilder ──────────────────────────────────────────────────────

/// Fluent builder for a [`Bus`].
///
/// # Example
/// ```ignore
/// let bus = Bus::builder()
///     .max_message(2)
///     .worker_pool(1)
///     .on_failure(|dropped| eprintln!("dropped {}: {}", dropped.id, dropped.reason))
///     .build();
/// ```
pub struct BusBuilder {
    config: BusConfig,
    failure_hook: Option<FailureHook>,
}

impl BusBuilder {
    pub fn new() -> Self {
        Self {
            config: BusConfig::default(),
            failure_hook: None,
        }
    }

    /// Start from an existing config (e.g. loaded from TOML).
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Per-topic queue capacity (default: 100).
    pub fn max_message(mut self, max_message: usize) -> Self {
        self.config.max_message = max_message;
        self
    }

    /// Workers per topic (default: 5; 0 is treated as 1).
    pub fn worker_pool(mut self, worker_pool: usize) -> Self {
        self.config.worker_pool = worker_pool;
        self
    }

    /// Replace the default log-and-drop hook for failed deliveries.
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DroppedMessage) + Send + Sync + 'static,
    {
        self.failure_hook = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Bus {
        let hook = self.failure_hook.unwrap_or_else(failure::default_hook);
        Bus::with_failure_hook(self.config, hook)
    }
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}
