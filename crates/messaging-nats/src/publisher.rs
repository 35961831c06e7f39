use async_trait::async_trait;
use beacon_envelope::{Envelope, codec};
use beacon_messaging::publisher::{EventPublisher, PublishReceipt};
use beacon_messaging::subject::{SubjectMapper, validate_subject};
use tracing::{debug, instrument};

use crate::Error;
use crate::broker::{Broker, JetStreamBroker};
use crate::config::PublisherConfig;
use crate::provisioner::StreamProvisioner;
use crate::retry::RetryPolicy;

/// Publishes envelopes to a JetStream stream.
///
/// Holds one broker connection for its whole lifetime. The stream is
/// provisioned on the first publish and cached from then on.
#[derive(Debug)]
pub struct NatsPublisher<B = JetStreamBroker>
where
    B: Broker,
{
    broker: B,
    mapper: SubjectMapper,
    provisioner: StreamProvisioner<B>,
    retry: RetryPolicy,
}

impl NatsPublisher<JetStreamBroker> {
    /// Connects to the server named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the connection fails.
    pub async fn connect(config: PublisherConfig) -> Result<Self, Error> {
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

impl<B> NatsPublisher<B>
where
    B: Broker,
{
    /// Creates a publisher over an existing broker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the configuration is invalid.
    pub fn new(broker: B, config: PublisherConfig) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            provisioner: StreamProvisioner::new(broker.clone(), config.stream),
            broker,
            mapper: SubjectMapper::new(config.event_type_prefix),
            retry: config.retry,
        })
    }

    /// Whether the broker connection is up.
    pub fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    /// Whether the stream has been provisioned yet.
    pub fn is_stream_provisioned(&self) -> bool {
        self.provisioner.is_provisioned()
    }
}

#[async_trait]
impl<B> EventPublisher for NatsPublisher<B>
where
    B: Broker,
{
    type Error = Error;

    #[instrument(
        skip(self, envelope),
        fields(id = %envelope.id(), event_type = %envelope.event_type())
    )]
    async fn publish(&self, envelope: Envelope) -> Result<PublishReceipt, Error> {
        envelope
            .validate()
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;

        let subject = self.mapper.to_wire_subject(envelope.event_type())?;
        validate_subject(&subject)?;

        let payload = codec::encode(&envelope)?;

        self.provisioner.ensure().await?;

        let broker = &self.broker;
        let wire_subject = subject.as_str();
        let (sequence, attempts) = self
            .retry
            .run("publish", move |_| broker.publish(wire_subject, payload.clone()))
            .await?;

        debug!(subject = %subject, sequence, attempts, "published");

        Ok(PublishReceipt {
            subject,
            sequence,
            attempts,
        })
    }
}
