//! NATS JetStream implementation of the beacon messaging interfaces.
//!
//! [`NatsPublisher`] appends CloudEvents envelopes to a durable stream and
//! retries transient failures. [`NatsSubscriber`] binds subject patterns to
//! handlers through durable pull consumers, bounds concurrent handler
//! execution, and routes repeatedly failing messages to a `.dlq` subject.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Broker seam and its JetStream implementation.
pub mod broker;

/// Publisher and subscriber configuration.
pub mod config;

mod error;
mod provisioner;

/// Envelope publisher.
pub mod publisher;

/// Retry and backoff for transient broker failures.
pub mod retry;

/// Envelope subscriber.
pub mod subscriber;

pub use broker::{
    Broker, BrokerError, BrokerErrorKind, ConsumerSpec, Delivery, JetStreamBroker, StreamSpec,
};
pub use config::{PublisherConfig, SubscriberConfig};
pub use error::Error;
pub use provisioner::StreamProvisioner;
pub use publisher::NatsPublisher;
pub use retry::RetryPolicy;
pub use subscriber::{NatsSubscriber, SubscriberEvent, SubscriberStats};
