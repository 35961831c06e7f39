mod dispatch;
mod events;

pub use events::{SubscriberEvent, SubscriberStats};

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use beacon_messaging::handler::EventHandler;
use beacon_messaging::subject::{SubjectMapper, durable_name, validate_subject_pattern};
use beacon_messaging::subscriber::{EventSubscriber, SubscriptionHandle, SubscriptionKey};
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, instrument};

use crate::Error;
use crate::broker::{Broker, ConsumerSpec, JetStreamBroker};
use crate::config::SubscriberConfig;
use crate::provisioner::StreamProvisioner;
use dispatch::{ConsumeLoop, Dispatcher, Registry};
use events::Counters;

/// Subscribes handlers to subject patterns through durable JetStream consumers.
///
/// Every subscription runs its own consume loop. Handler invocations across
/// all subscriptions share one concurrency gate, and every spawned task is
/// tracked so [`shutdown`](EventSubscriber::shutdown) can wait for it.
#[derive(Debug)]
pub struct NatsSubscriber<B = JetStreamBroker>
where
    B: Broker,
{
    broker: B,
    config: SubscriberConfig,
    counters: Arc<Counters>,
    events: broadcast::Sender<SubscriberEvent>,
    gate: Arc<Semaphore>,
    mapper: SubjectMapper,
    next_instance: AtomicU64,
    provisioner: StreamProvisioner<B>,
    registry: Registry,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl NatsSubscriber<JetStreamBroker> {
    /// Connects to the server named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the connection fails.
    pub async fn connect(config: SubscriberConfig) -> Result<Self, Error> {
        config.validate()?;

        let broker = JetStreamBroker::connect(&config.nats_url, config.connect_timeout)
            .await
            .map_err(|source| Error::Connect {
                url: config.nats_url.clone(),
                source,
            })?;

        Self::new(broker, config)
    }
}

impl<B> NatsSubscriber<B>
where
    B: Broker,
{
    /// Creates a subscriber over an existing broker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the configuration is invalid.
    pub fn new(broker: B, config: SubscriberConfig) -> Result<Self, Error> {
        config.validate()?;

        let (events, _) = broadcast::channel(config.event_capacity);

        Ok(Self {
            provisioner: StreamProvisioner::new(broker.clone(), config.stream.clone()),
            broker,
            counters: Arc::new(Counters::default()),
            events,
            gate: Arc::new(Semaphore::new(config.max_concurrency)),
            mapper: SubjectMapper::new(config.event_type_prefix.clone()),
            next_instance: AtomicU64::new(1),
            registry: Arc::new(Mutex::new(HashMap::new())),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            config,
        })
    }

    /// Receives processing failures and dead-letter notifications.
    pub fn events(&self) -> broadcast::Receiver<SubscriberEvent> {
        self.events.subscribe()
    }

    /// Current counters.
    pub async fn stats(&self) -> SubscriberStats {
        let subscriptions = self.registry.lock().await.len();

        self.counters.snapshot(subscriptions)
    }

    /// Keys of the subscriptions still running.
    pub async fn subscriptions(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self.registry.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Whether the broker connection is up.
    pub fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    /// The settings this subscriber runs with.
    pub const fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    #[instrument(skip(self, handler, external), fields(service = %self.config.service_name))]
    async fn start<T, H>(
        &self,
        pattern: &str,
        handler: H,
        external: Option<CancellationToken>,
    ) -> Result<SubscriptionHandle, Error>
    where
        T: DeserializeOwned + Send + 'static,
        H: EventHandler<T>,
    {
        if self.root.is_cancelled() {
            return Err(Error::AlreadyShutdown);
        }

        let wire_pattern = self.mapper.to_wire_subject(pattern)?;
        validate_subject_pattern(&wire_pattern)?;

        let durable_name = durable_name(&self.config.service_name, &wire_pattern);

        self.provisioner.ensure().await?;

        self.broker
            .ensure_consumer(
                &self.config.stream.name,
                &ConsumerSpec {
                    durable_name: durable_name.clone(),
                    filter_subject: wire_pattern.clone(),
                    ack_wait: self.config.ack_wait,
                    max_deliver: self.config.broker_max_deliver,
                },
            )
            .await?;

        let cancel = self.root.child_token();

        if let Some(external) = external {
            let linked = cancel.clone();
            self.tracker.spawn(async move {
                tokio::select! {
                    () = external.cancelled() => linked.cancel(),
                    () = linked.cancelled() => {}
                }
            });
        }

        let key = SubscriptionKey {
            durable_name: durable_name.clone(),
            instance: self.next_instance.fetch_add(1, Ordering::Relaxed),
        };

        self.registry
            .lock()
            .await
            .insert(key.clone(), cancel.clone());

        let consume = ConsumeLoop {
            dispatcher: Arc::new(Dispatcher {
                broker: self.broker.clone(),
                cancel: cancel.clone(),
                counters: Arc::clone(&self.counters),
                durable_name,
                events: self.events.clone(),
                handler,
                max_delivery_attempts: self.config.max_delivery_attempts,
                _marker: PhantomData,
            }),
            gate: Arc::clone(&self.gate),
            key: key.clone(),
            prefetch: self.config.max_concurrency,
            registry: Arc::clone(&self.registry),
            resubscribe_delay: self.config.resubscribe_delay,
            stream: self.config.stream.name.clone(),
            tracker: self.tracker.clone(),
        };

        self.tracker.spawn(consume.run());

        info!(pattern, wire_pattern = %wire_pattern, subscription = %key, "subscribed");

        Ok(SubscriptionHandle::new(key, cancel))
    }
}

#[async_trait]
impl<B> EventSubscriber for NatsSubscriber<B>
where
    B: Broker,
{
    type Error = Error;

    async fn subscribe<T, H>(&self, pattern: &str, handler: H) -> Result<SubscriptionHandle, Error>
    where
        T: DeserializeOwned + Send + 'static,
        H: EventHandler<T>,
    {
        self.start::<T, H>(pattern, handler, None).await
    }

    async fn subscribe_with_cancellation<T, H>(
        &self,
        pattern: &str,
        handler: H,
        cancel: CancellationToken,
    ) -> Result<SubscriptionHandle, Error>
    where
        T: DeserializeOwned + Send + 'static,
        H: EventHandler<T>,
    {
        self.start::<T, H>(pattern, handler, Some(cancel)).await
    }

    async fn unsubscribe(&self, key: &SubscriptionKey) -> bool {
        let Some(cancel) = self.registry.lock().await.remove(key) else {
            return false;
        };

        cancel.cancel();
        info!(subscription = %key, "unsubscribed");

        true
    }

    async fn shutdown(&self) -> Result<(), Error> {
        let subscriptions = self.registry.lock().await.len();
        info!(
            subscriptions,
            in_flight = self.gate_in_use(),
            "shutting down subscriber"
        );

        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.registry.lock().await.clear();

        info!("subscriber shut down");

        Ok(())
    }
}

impl<B> NatsSubscriber<B>
where
    B: Broker,
{
    fn gate_in_use(&self) -> usize {
        self.config
            .max_concurrency
            .saturating_sub(self.gate.available_permits())
    }
}

impl<B> Drop for NatsSubscriber<B>
where
    B: Broker,
{
    fn drop(&mut self) {
        self.root.cancel();
    }
}
