//! Event envelopes and their structured-mode wire encoding.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Structured content mode: the whole envelope as one JSON document.
pub mod codec;

mod data;
mod envelope;
mod error;
mod extension;

pub use data::EventData;
pub use envelope::{Envelope, EnvelopeBuilder};
pub use error::Error;
pub use extension::{ACTOR_ID, ACTOR_NAME, CORRELATION_ID, ExtensionValue};
