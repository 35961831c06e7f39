use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use beacon_envelope::codec;
use beacon_messaging::handler::{EventHandler, HandlerError};
use beacon_messaging::subject::dlq_subject;
use beacon_messaging::subscriber::SubscriptionKey;
use futures::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::events::{Counters, SubscriberEvent};
use crate::broker::{Broker, BrokerError, Delivery, DeliveryStream};

pub(crate) type Registry = Arc<Mutex<HashMap<SubscriptionKey, CancellationToken>>>;

/// Drives one message of one subscription to its final outcome.
pub(crate) struct Dispatcher<B, T, H> {
    pub broker: B,
    pub cancel: CancellationToken,
    pub counters: Arc<Counters>,
    pub durable_name: String,
    pub events: broadcast::Sender<SubscriberEvent>,
    pub handler: H,
    pub max_delivery_attempts: u64,
    pub _marker: PhantomData<fn() -> T>,
}

impl<B, T, H> Dispatcher<B, T, H>
where
    B: Broker,
    T: DeserializeOwned + Send + 'static,
    H: EventHandler<T>,
{
    fn emit(&self, event: SubscriberEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    pub async fn process(&self, delivery: B::Delivery) {
        let _in_flight = self.counters.enter();

        let envelope = match codec::decode(delivery.payload()) {
            Ok(envelope) => envelope,
            Err(e) => return self.reject(&delivery, e.to_string()).await,
        };

        let data = match envelope.data().decode_as::<T>() {
            Ok(data) => data,
            Err(e) => {
                let error = format!("data does not match handler type: {e}");
                return self.reject(&delivery, error).await;
            }
        };

        let event_id = envelope.id().to_string();

        let outcome = AssertUnwindSafe(self.handler.handle(envelope, data, self.cancel.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_error(panic.as_ref())));

        match outcome {
            Ok(()) => {
                if self.ack(&delivery).await {
                    debug!(
                        durable_name = %self.durable_name,
                        event_id = %event_id,
                        delivered = delivery.delivered(),
                        "handled"
                    );
                }
            }
            Err(e) if self.cancel.is_cancelled() => {
                // Left unacknowledged; the broker redelivers after the ack wait.
                debug!(
                    durable_name = %self.durable_name,
                    event_id = %event_id,
                    error = %e,
                    "handler failed after cancellation, abandoning message"
                );
            }
            Err(e) => self.fail(&delivery, event_id, &e).await,
        }
    }

    /// Poison message: acknowledge so it is never redelivered.
    async fn reject(&self, delivery: &B::Delivery, error: String) {
        Counters::bump(&self.counters.decode_failed);

        warn!(
            durable_name = %self.durable_name,
            subject = delivery.subject(),
            error = %error,
            "dropping undecodable message"
        );

        self.emit(SubscriberEvent::DecodeFailed {
            durable_name: self.durable_name.clone(),
            subject: delivery.subject().to_string(),
            error,
        });

        self.ack(delivery).await;
    }

    async fn fail(&self, delivery: &B::Delivery, event_id: String, error: &HandlerError) {
        Counters::bump(&self.counters.handler_failed);

        let delivered = delivery.delivered();

        warn!(
            durable_name = %self.durable_name,
            event_id = %event_id,
            delivered,
            max_delivery_attempts = self.max_delivery_attempts,
            error = %error,
            "handler failed"
        );

        self.emit(SubscriberEvent::HandlerFailed {
            durable_name: self.durable_name.clone(),
            event_id: event_id.clone(),
            delivered,
            error: error.to_string(),
        });

        if delivered < self.max_delivery_attempts {
            match delivery.nak().await {
                Ok(()) => Counters::bump(&self.counters.nacked),
                Err(e) => self.ack_failed(delivery, &e),
            }
        } else {
            self.dead_letter(delivery, event_id).await;
        }
    }

    /// Parks the original payload on `<subject>.dlq` and acknowledges the message
    /// whether or not that publish succeeded.
    async fn dead_letter(&self, delivery: &B::Delivery, event_id: String) {
        let dlq_subject = dlq_subject(delivery.subject());

        match self
            .broker
            .publish(&dlq_subject, delivery.payload().clone())
            .await
        {
            Ok(sequence) => {
                Counters::bump(&self.counters.dead_lettered);

                warn!(
                    durable_name = %self.durable_name,
                    event_id = %event_id,
                    dlq_subject = %dlq_subject,
                    sequence,
                    "dead-lettered"
                );

                self.emit(SubscriberEvent::DeadLettered {
                    durable_name: self.durable_name.clone(),
                    event_id,
                    dlq_subject,
                });
            }
            Err(e) => {
                error!(
                    durable_name = %self.durable_name,
                    event_id = %event_id,
                    dlq_subject = %dlq_subject,
                    error = %e,
                    "dead-letter publish failed, acknowledging anyway"
                );

                self.emit(SubscriberEvent::DeadLetterFailed {
                    durable_name: self.durable_name.clone(),
                    event_id,
                    dlq_subject,
                    error: e.to_string(),
                });
            }
        }

        self.ack(delivery).await;
    }

    async fn ack(&self, delivery: &B::Delivery) -> bool {
        match delivery.ack().await {
            Ok(()) => {
                Counters::bump(&self.counters.acked);
                true
            }
            Err(e) => {
                self.ack_failed(delivery, &e);
                false
            }
        }
    }

    fn ack_failed(&self, delivery: &B::Delivery, error: &BrokerError) {
        warn!(
            durable_name = %self.durable_name,
            subject = delivery.subject(),
            error = %error,
            "failed to settle message"
        );

        self.emit(SubscriberEvent::AckFailed {
            durable_name: self.durable_name.clone(),
            subject: delivery.subject().to_string(),
            error: error.to_string(),
        });
    }

    fn consume_failed(&self, error: &BrokerError) {
        warn!(durable_name = %self.durable_name, error = %error, "delivery stream failed");

        self.emit(SubscriberEvent::ConsumeFailed {
            durable_name: self.durable_name.clone(),
            error: error.to_string(),
        });
    }
}

/// Turns a caught handler panic into an ordinary handler failure.
fn panic_error(panic: &(dyn Any + Send)) -> HandlerError {
    let message = panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());

    format!("handler panicked: {message}").into()
}

/// Pulls deliveries for one subscription and hands them to the dispatcher.
pub(crate) struct ConsumeLoop<B, T, H> {
    pub dispatcher: Arc<Dispatcher<B, T, H>>,
    pub gate: Arc<Semaphore>,
    pub key: SubscriptionKey,
    pub prefetch: usize,
    pub registry: Registry,
    pub resubscribe_delay: Duration,
    pub stream: String,
    pub tracker: TaskTracker,
}

impl<B, T, H> ConsumeLoop<B, T, H>
where
    B: Broker,
    T: DeserializeOwned + Send + 'static,
    H: EventHandler<T>,
{
    pub async fn run(self) {
        let cancel = self.dispatcher.cancel.clone();

        info!(subscription = %self.key, "consume loop started");

        while !cancel.is_cancelled() {
            let open = self.dispatcher.broker.deliveries(
                &self.stream,
                &self.dispatcher.durable_name,
                self.prefetch,
            );

            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                opened = open => opened,
            };

            let outcome = match opened {
                Ok(deliveries) => self.pump(deliveries, &cancel).await,
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                self.dispatcher.consume_failed(&e);

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.resubscribe_delay) => {}
                }
            }
        }

        self.registry.lock().await.remove(&self.key);

        info!(subscription = %self.key, "consume loop stopped");
    }

    /// Returns `Ok` once cancelled and `Err` when the delivery stream breaks.
    async fn pump(
        &self,
        mut deliveries: DeliveryStream<B::Delivery>,
        cancel: &CancellationToken,
    ) -> Result<(), BrokerError> {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(e),
                None => return Err(BrokerError::transient("delivery stream ended")),
            };

            // Blocks pulling while the gate is saturated.
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                permit = Arc::clone(&self.gate).acquire_owned() => {
                    permit.map_err(|_| BrokerError::permanent("concurrency gate closed"))?
                }
            };

            let dispatcher = Arc::clone(&self.dispatcher);
            self.tracker.spawn(async move {
                dispatcher.process(delivery).await;
                drop(permit);
            });
        }
    }
}
