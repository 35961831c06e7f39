//! In-process broker with scripted failures.
//!
//! Stores every published payload, feeds durable consumers whose filter
//! matches, redelivers on nak with an incremented delivery count, and
//! records every settlement so tests can assert on them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use beacon_messaging::subject::subject_matches_pattern;
use beacon_messaging_nats::broker::DeliveryStream;
use beacon_messaging_nats::{Broker, BrokerError, ConsumerSpec, Delivery, StreamSpec};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;

/// A recorded ack or nak.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settled {
    pub durable_name: String,
    pub subject: String,
    pub delivered: u64,
    pub payload: Bytes,
}

type Queue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeDelivery>>>;

struct Consumer {
    spec: ConsumerSpec,
    sender: mpsc::UnboundedSender<FakeDelivery>,
    queue: Queue,
}

#[derive(Default)]
struct State {
    acks: Vec<Settled>,
    consumers: HashMap<String, Consumer>,
    ensure_stream_calls: usize,
    failing_suffix: Option<String>,
    messages: Vec<(String, Bytes)>,
    naks: Vec<Settled>,
    open_failures: usize,
    opened_batches: Vec<usize>,
    publish_attempts: Vec<String>,
    publish_failures: VecDeque<BrokerError>,
    stream: Option<StreamSpec>,
    stream_failures: usize,
}

#[derive(Clone)]
pub struct FakeBroker {
    connected: Arc<AtomicBool>,
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for FakeBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeBroker").finish_non_exhaustive()
    }
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBroker {
    pub fn new() -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(true)),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// The next `errors.len()` publishes fail with these errors, in order.
    pub fn fail_next_publishes(&self, errors: impl IntoIterator<Item = BrokerError>) {
        self.state().publish_failures.extend(errors);
    }

    /// Publishes to subjects ending in `suffix` fail permanently.
    pub fn fail_publishes_ending_with(&self, suffix: &str) {
        self.state().failing_suffix = Some(suffix.to_string());
    }

    pub fn fail_next_stream_ensures(&self, count: usize) {
        self.state().stream_failures = count;
    }

    pub fn fail_next_opens(&self, count: usize) {
        self.state().open_failures = count;
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Stores a raw payload as if another producer had published it.
    pub fn inject(&self, subject: &str, payload: impl Into<Bytes>) {
        let mut state = self.state();
        Self::store(&mut state, subject, payload.into());
    }

    pub fn ensure_stream_calls(&self) -> usize {
        self.state().ensure_stream_calls
    }

    pub fn publish_attempts(&self) -> Vec<String> {
        self.state().publish_attempts.clone()
    }

    pub fn messages(&self) -> Vec<(String, Bytes)> {
        self.state().messages.clone()
    }

    pub fn published_to(&self, subject: &str) -> Vec<Bytes> {
        self.state()
            .messages
            .iter()
            .filter(|(s, _)| s == subject)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn acks(&self) -> Vec<Settled> {
        self.state().acks.clone()
    }

    pub fn naks(&self) -> Vec<Settled> {
        self.state().naks.clone()
    }

    pub fn consumer_spec(&self, durable_name: &str) -> Option<ConsumerSpec> {
        self.state()
            .consumers
            .get(durable_name)
            .map(|consumer| consumer.spec.clone())
    }

    /// Pull batch sizes requested by every opened delivery stream.
    pub fn opened_batches(&self) -> Vec<usize> {
        self.state().opened_batches.clone()
    }

    pub fn consumer_count(&self) -> usize {
        self.state().consumers.len()
    }

    fn store(state: &mut State, subject: &str, payload: Bytes) -> u64 {
        state.messages.push((subject.to_string(), payload.clone()));

        for (durable_name, consumer) in &state.consumers {
            if subject_matches_pattern(subject, &consumer.spec.filter_subject) {
                let _ = consumer.sender.send(FakeDelivery {
                    broker: None,
                    delivered: 1,
                    durable_name: durable_name.clone(),
                    payload: payload.clone(),
                    subject: subject.to_string(),
                });
            }
        }

        state.messages.len() as u64
    }
}

#[async_trait]
impl Broker for FakeBroker {
    type Delivery = FakeDelivery;

    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), BrokerError> {
        let mut state = self.state();
        state.ensure_stream_calls += 1;

        if state.stream_failures > 0 {
            state.stream_failures -= 1;
            return Err(BrokerError::transient("jetstream not available"));
        }

        state.stream = Some(spec.clone());
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<u64, BrokerError> {
        let mut state = self.state();
        state.publish_attempts.push(subject.to_string());

        if let Some(suffix) = &state.failing_suffix {
            if subject.ends_with(suffix.as_str()) {
                return Err(BrokerError::permanent("publish rejected"));
            }
        }

        if let Some(error) = state.publish_failures.pop_front() {
            return Err(error);
        }

        let captured = state.stream.as_ref().is_some_and(|stream| {
            stream
                .subjects
                .iter()
                .any(|pattern| subject_matches_pattern(subject, pattern))
        });
        if !captured {
            return Err(BrokerError::transient("no responders"));
        }

        Ok(Self::store(&mut state, subject, payload))
    }

    async fn ensure_consumer(&self, stream: &str, spec: &ConsumerSpec) -> Result<(), BrokerError> {
        let mut state = self.state();

        if state.stream.as_ref().map(|s| s.name.as_str()) != Some(stream) {
            return Err(BrokerError::permanent("stream not found"));
        }

        if let Some(consumer) = state.consumers.get_mut(&spec.durable_name) {
            consumer.spec = spec.clone();
            return Ok(());
        }

        let (sender, receiver) = mpsc::unbounded_channel();

        // New durable consumers start from the beginning of the stream.
        for (subject, payload) in &state.messages {
            if subject_matches_pattern(subject, &spec.filter_subject) {
                let _ = sender.send(FakeDelivery {
                    broker: None,
                    delivered: 1,
                    durable_name: spec.durable_name.clone(),
                    payload: payload.clone(),
                    subject: subject.clone(),
                });
            }
        }

        state.consumers.insert(
            spec.durable_name.clone(),
            Consumer {
                spec: spec.clone(),
                sender,
                queue: Arc::new(tokio::sync::Mutex::new(receiver)),
            },
        );

        Ok(())
    }

    async fn deliveries(
        &self,
        _stream: &str,
        durable_name: &str,
        max_messages: usize,
    ) -> Result<DeliveryStream<Self::Delivery>, BrokerError> {
        let queue = {
            let mut state = self.state();
            state.opened_batches.push(max_messages);

            if state.open_failures > 0 {
                state.open_failures -= 1;
                return Err(BrokerError::transient("consumer unavailable"));
            }

            state
                .consumers
                .get(durable_name)
                .map(|consumer| Arc::clone(&consumer.queue))
                .ok_or_else(|| BrokerError::permanent("consumer not found"))?
        };

        let broker = self.clone();
        let stream = futures::stream::unfold(queue, move |queue| {
            let broker = broker.clone();
            async move {
                let next = queue.lock().await.recv().await;
                next.map(|mut delivery| {
                    delivery.broker = Some(broker);
                    (Ok(delivery), queue)
                })
            }
        });

        Ok(stream.boxed())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

pub struct FakeDelivery {
    broker: Option<FakeBroker>,
    delivered: u64,
    durable_name: String,
    payload: Bytes,
    subject: String,
}

impl FakeDelivery {
    fn settled(&self) -> Settled {
        Settled {
            durable_name: self.durable_name.clone(),
            subject: self.subject.clone(),
            delivered: self.delivered,
            payload: self.payload.clone(),
        }
    }

    fn broker(&self) -> &FakeBroker {
        self.broker.as_ref().expect("delivery handed out by a consumer")
    }
}

#[async_trait]
impl Delivery for FakeDelivery {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn payload(&self) -> &Bytes {
        &self.payload
    }

    fn delivered(&self) -> u64 {
        self.delivered
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.broker().state().acks.push(self.settled());
        Ok(())
    }

    async fn nak(&self) -> Result<(), BrokerError> {
        let mut state = self.broker().state();
        state.naks.push(self.settled());

        if let Some(consumer) = state.consumers.get(&self.durable_name) {
            if self.delivered < consumer.spec.max_deliver {
                let _ = consumer.sender.send(FakeDelivery {
                    broker: None,
                    delivered: self.delivered + 1,
                    durable_name: self.durable_name.clone(),
                    payload: self.payload.clone(),
                    subject: self.subject.clone(),
                });
            }
        }

        Ok(())
    }
}
