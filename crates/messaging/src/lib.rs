//! Abstract interface for publishing and subscribing to event envelopes.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

/// Handlers process the typed data carried by delivered envelopes.
pub mod handler;

/// Publishers append envelopes to a durable stream.
pub mod publisher;

/// Mapping between event types and broker subjects.
pub mod subject;

/// Subscribers bind subject patterns to handlers.
pub mod subscriber;

pub use error::Error;
pub use handler::{EventHandler, FnHandler, HandlerError, handler_fn};
pub use publisher::{EventPublisher, PublishReceipt, PublisherError};
pub use subject::SubjectMapper;
pub use subscriber::{EventSubscriber, SubscriberError, SubscriptionHandle, SubscriptionKey};

pub use beacon_envelope::{Envelope, EventData};
pub use tokio_util::sync::CancellationToken;
