use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::handler::EventHandler;

/// Marker trait for subscriber errors.
pub trait SubscriberError: Error + Send + Sync + 'static {}

/// Identifies one subscription within a subscriber.
///
/// Several subscriptions may share a durable name; each gets its own instance number.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    /// Durable consumer the subscription reads from.
    pub durable_name: String,

    /// Per-subscriber instance counter.
    pub instance: u64,
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.durable_name, self.instance)
    }
}

/// Returned by a successful subscribe.
#[derive(Clone, Debug)]
pub struct SubscriptionHandle {
    key: SubscriptionKey,
    cancel: CancellationToken,
}

impl SubscriptionHandle {
    /// Creates a handle.
    #[must_use]
    pub const fn new(key: SubscriptionKey, cancel: CancellationToken) -> Self {
        Self { key, cancel }
    }

    /// Registry key of the subscription.
    #[must_use]
    pub const fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Durable consumer name.
    #[must_use]
    pub fn durable_name(&self) -> &str {
        &self.key.durable_name
    }

    /// Stops this subscription's consume loop only.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the subscription has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Binds subject patterns to handlers over durable consumers.
#[async_trait]
pub trait EventSubscriber
where
    Self: Send + Sync + 'static,
{
    /// The error type for the subscriber.
    type Error: SubscriberError;

    /// Subscribes `handler` to `pattern`, stopping when the subscriber shuts down.
    async fn subscribe<T, H>(
        &self,
        pattern: &str,
        handler: H,
    ) -> Result<SubscriptionHandle, Self::Error>
    where
        T: DeserializeOwned + Send + 'static,
        H: EventHandler<T>;

    /// Subscribes `handler` to `pattern`, also stopping when `cancel` fires.
    async fn subscribe_with_cancellation<T, H>(
        &self,
        pattern: &str,
        handler: H,
        cancel: CancellationToken,
    ) -> Result<SubscriptionHandle, Self::Error>
    where
        T: DeserializeOwned + Send + 'static,
        H: EventHandler<T>;

    /// Cancels one subscription. Returns `false` if the key is unknown.
    async fn unsubscribe(&self, key: &SubscriptionKey) -> bool;

    /// Cancels every subscription and waits for in-flight handlers to finish.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}
