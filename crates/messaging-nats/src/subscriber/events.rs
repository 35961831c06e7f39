use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Out-of-band report of something that happened while processing messages.
///
/// Subscription processing never returns errors to a caller, so failures
/// surface here and in the logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriberEvent {
    /// A payload could not be decoded. It was acknowledged and dropped.
    DecodeFailed {
        /// Durable consumer that received the message.
        durable_name: String,
        /// Wire subject of the message.
        subject: String,
        /// Decoder error.
        error: String,
    },

    /// A handler returned an error.
    HandlerFailed {
        /// Durable consumer that received the message.
        durable_name: String,
        /// Envelope id.
        event_id: String,
        /// Delivery attempt that failed.
        delivered: u64,
        /// Handler error.
        error: String,
    },

    /// A message exhausted its delivery attempts and was parked on its dead-letter subject.
    DeadLettered {
        /// Durable consumer that received the message.
        durable_name: String,
        /// Envelope id.
        event_id: String,
        /// Subject the raw payload was published to.
        dlq_subject: String,
    },

    /// Publishing to the dead-letter subject failed. The message was still acknowledged.
    DeadLetterFailed {
        /// Durable consumer that received the message.
        durable_name: String,
        /// Envelope id.
        event_id: String,
        /// Subject the publish was attempted on.
        dlq_subject: String,
        /// Broker error.
        error: String,
    },

    /// An ack or nak could not be delivered to the broker.
    AckFailed {
        /// Durable consumer that received the message.
        durable_name: String,
        /// Wire subject of the message.
        subject: String,
        /// Broker error.
        error: String,
    },

    /// The delivery stream of a consumer failed and is being reopened.
    ConsumeFailed {
        /// Durable consumer affected.
        durable_name: String,
        /// Broker error.
        error: String,
    },
}

/// Snapshot of subscriber counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Messages pulled from the broker.
    pub received: u64,
    /// Messages acknowledged, whatever the outcome that led to it.
    pub acked: u64,
    /// Messages negatively acknowledged for redelivery.
    pub nacked: u64,
    /// Messages routed to a dead-letter subject.
    pub dead_lettered: u64,
    /// Messages dropped because they could not be decoded.
    pub decode_failed: u64,
    /// Handler invocations that returned an error.
    pub handler_failed: u64,
    /// Messages currently being processed.
    pub in_flight: usize,
    /// Subscriptions currently registered.
    pub subscriptions: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub received: AtomicU64,
    pub acked: AtomicU64,
    pub nacked: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub decode_failed: AtomicU64,
    pub handler_failed: AtomicU64,
    pub in_flight: AtomicUsize,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, subscriptions: usize) -> SubscriberStats {
        SubscriberStats {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            nacked: self.nacked.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            decode_failed: self.decode_failed.load(Ordering::Relaxed),
            handler_failed: self.handler_failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            subscriptions,
        }
    }

    pub fn enter(&self) -> InFlight<'_> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Self::bump(&self.received);

        InFlight(self)
    }
}

/// Decrements the in-flight count when the message outcome is final.
pub(crate) struct InFlight<'a>(&'a Counters);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
