use beacon_messaging::publisher::PublisherError;
use beacon_messaging::subscriber::SubscriberError;
use thiserror::Error;

use crate::broker::BrokerError;

/// Errors that can occur when publishing or subscribing.
#[derive(Debug, Error)]
pub enum Error {
    /// The subscriber has been shut down.
    #[error("subscriber has been shut down")]
    AlreadyShutdown,

    /// A broker operation failed and was not retried.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The envelope could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] beacon_envelope::Error),

    /// Could not connect to the NATS server.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        /// Server address.
        url: String,

        /// Underlying failure.
        #[source]
        source: BrokerError,
    },

    /// A required value was blank or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The stream could not be provisioned.
    #[error("failed to provision stream: {0}")]
    Provisioning(#[source] BrokerError),

    /// Every publish attempt failed.
    #[error("publish failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: usize,

        /// Failure of the final attempt.
        #[source]
        source: BrokerError,
    },
}

impl From<beacon_messaging::Error> for Error {
    fn from(error: beacon_messaging::Error) -> Self {
        match error {
            beacon_messaging::Error::InvalidArgument(message) => Self::InvalidArgument(message),
        }
    }
}

impl PublisherError for Error {}
impl SubscriberError for Error {}
