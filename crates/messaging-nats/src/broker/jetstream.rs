use std::time::Duration;

use async_nats::connection::State;
use async_nats::jetstream::consumer::{AckPolicy, PullConsumer, pull};
use async_nats::jetstream::context::{CreateStreamErrorKind, PublishError, PublishErrorKind};
use async_nats::jetstream::{self, AckKind, ErrorCode};
use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{Broker, BrokerError, ConsumerSpec, Delivery, DeliveryStream, StreamSpec};

/// Broker backed by a single NATS connection and its JetStream context.
#[derive(Clone, Debug)]
pub struct JetStreamBroker {
    client: Client,
    jetstream: jetstream::Context,
}

impl JetStreamBroker {
    /// Wraps an existing client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());

        Self { client, jetstream }
    }

    /// Dials the server at `url`.
    ///
    /// # Errors
    ///
    /// Returns a transient error if the connection cannot be established within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, BrokerError> {
        let client = ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .map_err(|e| BrokerError::transient(e.to_string()))?;

        info!(url, "connected to NATS");

        Ok(Self::new(client))
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    async fn consumer(
        &self,
        stream: &str,
        durable_name: &str,
    ) -> Result<PullConsumer, BrokerError> {
        let stream = self
            .jetstream
            .get_stream(stream)
            .await
            .map_err(|e| BrokerError::transient(format!("failed to look up stream: {e}")))?;

        stream
            .get_consumer(durable_name)
            .await
            .map_err(|e| BrokerError::transient(format!("failed to look up consumer: {e}")))
    }
}

fn classify_publish(error: &PublishError) -> BrokerError {
    match error.kind() {
        PublishErrorKind::WrongLastMessageId | PublishErrorKind::WrongLastSequence => {
            BrokerError::permanent(error.to_string())
        }
        _ => BrokerError::transient(error.to_string()),
    }
}

#[async_trait]
impl Broker for JetStreamBroker {
    type Delivery = JetStreamDelivery;

    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), BrokerError> {
        let config = jetstream::stream::Config {
            name: spec.name.clone(),
            subjects: spec.subjects.clone(),
            ..Default::default()
        };

        match self.jetstream.create_stream(config).await {
            Ok(_) => {
                debug!(stream = %spec.name, "stream ready");
                Ok(())
            }
            Err(e) => match e.kind() {
                // Created concurrently, or exists with a different configuration.
                CreateStreamErrorKind::JetStream(err)
                    if err.error_code() == ErrorCode::STREAM_NAME_EXIST =>
                {
                    debug!(stream = %spec.name, "stream already exists");
                    Ok(())
                }
                CreateStreamErrorKind::TimedOut => Err(BrokerError::transient(e.to_string())),
                _ => Err(BrokerError::permanent(e.to_string())),
            },
        }
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<u64, BrokerError> {
        let ack = self
            .jetstream
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| classify_publish(&e))?
            .await
            .map_err(|e| classify_publish(&e))?;

        Ok(ack.sequence)
    }

    async fn ensure_consumer(&self, stream: &str, spec: &ConsumerSpec) -> Result<(), BrokerError> {
        let stream = self
            .jetstream
            .get_stream(stream)
            .await
            .map_err(|e| BrokerError::transient(format!("failed to look up stream: {e}")))?;

        stream
            .create_consumer(pull::Config {
                durable_name: Some(spec.durable_name.clone()),
                filter_subject: spec.filter_subject.clone(),
                ack_policy: AckPolicy::Explicit,
                ack_wait: spec.ack_wait,
                max_deliver: i64::try_from(spec.max_deliver).unwrap_or(i64::MAX),
                ..Default::default()
            })
            .await
            .map_err(|e| BrokerError::transient(format!("failed to create consumer: {e}")))?;

        debug!(durable_name = %spec.durable_name, filter = %spec.filter_subject, "consumer ready");

        Ok(())
    }

    async fn deliveries(
        &self,
        stream: &str,
        durable_name: &str,
        max_messages: usize,
    ) -> Result<DeliveryStream<Self::Delivery>, BrokerError> {
        let messages = self
            .consumer(stream, durable_name)
            .await?
            .stream()
            .max_messages_per_batch(max_messages.max(1))
            .messages()
            .await
            .map_err(|e| BrokerError::transient(format!("failed to open messages: {e}")))?;

        Ok(messages
            .map(|message| {
                message
                    .map(JetStreamDelivery::new)
                    .map_err(|e| BrokerError::transient(e.to_string()))
            })
            .boxed())
    }

    fn is_connected(&self) -> bool {
        matches!(self.client.connection_state(), State::Connected)
    }
}

/// A message pulled from a JetStream consumer.
#[derive(Debug)]
pub struct JetStreamDelivery {
    delivered: u64,
    message: jetstream::Message,
}

impl JetStreamDelivery {
    fn new(message: jetstream::Message) -> Self {
        let delivered = delivery_count(
            message.subject.as_str(),
            message.info().map(|info| info.delivered),
        );

        Self { delivered, message }
    }
}

/// Delivery count from the message metadata, falling back to 1 when it is unreadable.
fn delivery_count<E>(subject: &str, delivered: Result<i64, E>) -> u64
where
    E: std::fmt::Display,
{
    match delivered {
        Ok(delivered) => u64::try_from(delivered).unwrap_or(1),
        Err(e) => {
            // Such a message never reaches the dead-letter threshold.
            warn!(
                subject,
                error = %e,
                "unreadable delivery metadata, assuming first delivery"
            );
            1
        }
    }
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn subject(&self) -> &str {
        self.message.subject.as_str()
    }

    fn payload(&self) -> &Bytes {
        &self.message.payload
    }

    fn delivered(&self) -> u64 {
        self.delivered
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.message
            .ack()
            .await
            .map_err(|e| BrokerError::transient(e.to_string()))
    }

    async fn nak(&self) -> Result<(), BrokerError> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| BrokerError::transient(e.to_string()))
    }
}
