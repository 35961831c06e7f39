use std::time::Duration;

use beacon_messaging::subject::{
    DEFAULT_EVENT_TYPE_PREFIX, DEFAULT_SERVICE_NAME, validate_subject_pattern,
};
use serde::{Deserialize, Deserializer};

use crate::Error;
use crate::broker::StreamSpec;
use crate::retry::RetryPolicy;

/// Default NATS server address.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// Deserializes a duration given as whole milliseconds.
pub(crate) fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn validate_stream(stream: &StreamSpec) -> Result<(), Error> {
    if stream.name.trim().is_empty() {
        return Err(Error::InvalidArgument("stream name cannot be blank".to_string()));
    }

    if stream.name.contains(['.', '*', '>', ' ']) {
        return Err(Error::InvalidArgument(format!(
            "stream name '{}' contains reserved characters",
            stream.name
        )));
    }

    if stream.subjects.is_empty() {
        return Err(Error::InvalidArgument(
            "stream must capture at least one subject".to_string(),
        ));
    }

    for subject in &stream.subjects {
        validate_subject_pattern(subject)?;
    }

    Ok(())
}

/// Publisher settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublisherConfig {
    /// NATS server address.
    pub nats_url: String,

    /// How long to wait for the initial connection.
    #[serde(rename = "connect_timeout_ms", deserialize_with = "millis")]
    pub connect_timeout: Duration,

    /// Stream to provision and publish into.
    pub stream: StreamSpec,

    /// Event type prefix stripped to form wire subjects.
    pub event_type_prefix: String,

    /// Retry policy for transient publish failures.
    pub retry: RetryPolicy,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            nats_url: DEFAULT_NATS_URL.to_string(),
            connect_timeout: Duration::from_secs(5),
            stream: StreamSpec::default(),
            event_type_prefix: DEFAULT_EVENT_TYPE_PREFIX.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PublisherConfig {
    /// Checks the settings for values the publisher cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] describing the first bad value.
    pub fn validate(&self) -> Result<(), Error> {
        validate_stream(&self.stream)?;

        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidArgument(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.retry.base_delay > self.retry.max_delay {
            return Err(Error::InvalidArgument(
                "retry.base_delay cannot exceed retry.max_delay".to_string(),
            ));
        }

        Ok(())
    }
}

/// Subscriber settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SubscriberConfig {
    /// NATS server address.
    pub nats_url: String,

    /// How long to wait for the initial connection.
    #[serde(rename = "connect_timeout_ms", deserialize_with = "millis")]
    pub connect_timeout: Duration,

    /// Stream the durable consumers read from.
    pub stream: StreamSpec,

    /// Event type prefix stripped from subscription patterns.
    pub event_type_prefix: String,

    /// Logical service name. Instances sharing it share durable consumers.
    pub service_name: String,

    /// Handler invocations allowed to run at once across all subscriptions.
    pub max_concurrency: usize,

    /// Deliveries after which a failing message is dead-lettered.
    pub max_delivery_attempts: u64,

    /// Broker side delivery cap configured on each consumer.
    pub broker_max_deliver: u64,

    /// How long an unacknowledged message waits before redelivery.
    #[serde(rename = "ack_wait_ms", deserialize_with = "millis")]
    pub ack_wait: Duration,

    /// Pause before reopening a failed delivery stream.
    #[serde(rename = "resubscribe_delay_ms", deserialize_with = "millis")]
    pub resubscribe_delay: Duration,

    /// Capacity of the subscriber event channel.
    pub event_capacity: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            nats_url: DEFAULT_NATS_URL.to_string(),
            connect_timeout: Duration::from_secs(5),
            stream: StreamSpec::default(),
            event_type_prefix: DEFAULT_EVENT_TYPE_PREFIX.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            max_concurrency: 10,
            max_delivery_attempts: 3,
            broker_max_deliver: 3,
            ack_wait: Duration::from_secs(30),
            resubscribe_delay: Duration::from_secs(1),
            event_capacity: 256,
        }
    }
}

impl SubscriberConfig {
    /// Checks the settings for values the subscriber cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] describing the first bad value.
    pub fn validate(&self) -> Result<(), Error> {
        validate_stream(&self.stream)?;

        if self.max_concurrency == 0 {
            return Err(Error::InvalidArgument(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        if self.max_delivery_attempts == 0 {
            return Err(Error::InvalidArgument(
                "max_delivery_attempts must be at least 1".to_string(),
            ));
        }

        if self.max_delivery_attempts > self.broker_max_deliver {
            return Err(Error::InvalidArgument(format!(
                "max_delivery_attempts ({}) exceeds broker_max_deliver ({})",
                self.max_delivery_attempts, self.broker_max_deliver
            )));
        }

        if self.ack_wait.is_zero() {
            return Err(Error::InvalidArgument("ack_wait must be positive".to_string()));
        }

        if self.event_capacity == 0 {
            return Err(Error::InvalidArgument(
                "event_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
