use std::error::Error;

use async_trait::async_trait;
use beacon_envelope::Envelope;

/// Marker trait for publisher errors.
pub trait PublisherError: Error + Send + Sync + 'static {}

/// Outcome of a successful publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Wire subject the envelope was published under.
    pub subject: String,

    /// Sequence number the broker assigned.
    pub sequence: u64,

    /// Number of submission attempts it took.
    pub attempts: usize,
}

/// Appends envelopes to the durable stream.
#[async_trait]
pub trait EventPublisher
where
    Self: Send + Sync + 'static,
{
    /// The error type for the publisher.
    type Error: PublisherError;

    /// Publishes one envelope, retrying transient failures.
    async fn publish(&self, envelope: Envelope) -> Result<PublishReceipt, Self::Error>;

    /// Publishes envelopes one after another.
    ///
    /// Not atomic: when an envelope fails, the ones before it stay published.
    async fn publish_batch(
        &self,
        envelopes: Vec<Envelope>,
    ) -> Result<Vec<PublishReceipt>, Self::Error> {
        let mut receipts = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            receipts.push(self.publish(envelope).await?);
        }

        Ok(receipts)
    }
}
