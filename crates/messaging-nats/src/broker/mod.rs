mod jetstream;

pub use jetstream::{JetStreamBroker, JetStreamDelivery};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Deserialize;
use thiserror::Error;

/// Default stream name.
pub const DEFAULT_STREAM_NAME: &str = "BEACONTOWER";

/// Default subject captured by the stream.
pub const DEFAULT_STREAM_SUBJECT: &str = "beacontower.>";

/// Whether a broker failure is worth retrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrokerErrorKind {
    /// Connectivity, timeouts and other conditions that may clear up.
    Transient,

    /// Rejections that will fail the same way every time.
    Permanent,
}

impl fmt::Display for BrokerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

/// A failed broker operation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind} broker error: {message}")]
pub struct BrokerError {
    /// Classification used by the retry policy.
    pub kind: BrokerErrorKind,

    /// Human readable description.
    pub message: String,
}

impl BrokerError {
    /// Creates a retriable error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: BrokerErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Creates an error that must not be retried.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: BrokerErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Whether retrying might succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind == BrokerErrorKind::Transient
    }
}

/// Durable stream to provision.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamSpec {
    /// Stream name.
    pub name: String,

    /// Subjects the stream captures.
    pub subjects: Vec<String>,
}

impl Default for StreamSpec {
    fn default() -> Self {
        Self {
            name: DEFAULT_STREAM_NAME.to_string(),
            subjects: vec![DEFAULT_STREAM_SUBJECT.to_string()],
        }
    }
}

/// Durable consumer to create or update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerSpec {
    /// Durable consumer name, shared by every instance of a logical service.
    pub durable_name: String,

    /// Wire subject pattern the consumer is restricted to.
    pub filter_subject: String,

    /// How long an unacknowledged message waits before redelivery.
    pub ack_wait: Duration,

    /// Broker side cap on deliveries per message.
    pub max_deliver: u64,
}

/// Stream of deliveries from one durable consumer.
pub type DeliveryStream<D> = BoxStream<'static, Result<D, BrokerError>>;

/// One delivery of a stored message.
#[async_trait]
pub trait Delivery
where
    Self: Send + Sync + 'static,
{
    /// Wire subject the message was stored under.
    fn subject(&self) -> &str;

    /// Raw message body.
    fn payload(&self) -> &Bytes;

    /// Delivery attempt number as counted by the broker, starting at 1.
    fn delivered(&self) -> u64;

    /// Acknowledges the message so it is never redelivered.
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Negatively acknowledges the message so the broker redelivers it.
    async fn nak(&self) -> Result<(), BrokerError>;
}

/// Operations the publisher and subscriber drive on the broker.
#[async_trait]
pub trait Broker
where
    Self: Clone + Send + Sync + 'static,
{
    /// Delivery type handed out by consumers.
    type Delivery: Delivery;

    /// Creates the stream unless it already exists.
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), BrokerError>;

    /// Appends a payload and returns the sequence number it was stored at.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<u64, BrokerError>;

    /// Creates the durable consumer, or updates it if it exists.
    async fn ensure_consumer(&self, stream: &str, spec: &ConsumerSpec) -> Result<(), BrokerError>;

    /// Opens the delivery stream of an existing durable consumer.
    ///
    /// At most `max_messages` are pulled ahead of the caller, so a reader that
    /// stops polling stops the flow from the broker.
    async fn deliveries(
        &self,
        stream: &str,
        durable_name: &str,
        max_messages: usize,
    ) -> Result<DeliveryStream<Self::Delivery>, BrokerError>;

    /// Whether the underlying connection is currently up.
    fn is_connected(&self) -> bool;
}
