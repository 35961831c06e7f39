use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use beacon_envelope::Envelope;
use tokio_util::sync::CancellationToken;

/// Error returned by handlers. Any error counts as a processing failure.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one delivered envelope whose payload has been decoded into `T`.
///
/// Returning `Ok` acknowledges the message. Returning `Err` schedules a
/// redelivery, or routes the message to its dead-letter subject once the
/// delivery budget is spent. Delivery is at-least-once, so handlers must
/// tolerate duplicates.
#[async_trait]
pub trait EventHandler<T>
where
    Self: Send + Sync + 'static,
    T: Send + 'static,
{
    /// Handles the envelope. `cancel` fires when the subscription stops.
    async fn handle(
        &self,
        envelope: Envelope,
        data: T,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError>;
}

#[async_trait]
impl<T, H> EventHandler<T> for Arc<H>
where
    T: Send + 'static,
    H: EventHandler<T>,
{
    async fn handle(
        &self,
        envelope: Envelope,
        data: T,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        (**self).handle(envelope, data, cancel).await
    }
}

/// Adapts a bare async function into an [`EventHandler`].
pub struct FnHandler<F, T> {
    f: F,
    _marker: PhantomData<fn(T)>,
}

impl<F, T> std::fmt::Debug for FnHandler<F, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Wraps `f` so it can be passed wherever an [`EventHandler`] is expected.
pub const fn handler_fn<F, Fut, T>(f: F) -> FnHandler<F, T>
where
    F: Fn(Envelope, T, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    T: Send + 'static,
{
    FnHandler {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, T> EventHandler<T> for FnHandler<F, T>
where
    F: Fn(Envelope, T, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    T: Send + 'static,
{
    async fn handle(
        &self,
        envelope: Envelope,
        data: T,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        (self.f)(envelope, data, cancel).await
    }
}
