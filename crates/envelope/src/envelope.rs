use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::extension::validate_extension_name;
use crate::{ACTOR_ID, ACTOR_NAME, CORRELATION_ID, Error, EventData, ExtensionValue};

/// One immutable event.
///
/// Identifiers default to UUIDv7 so they sort by creation time.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    id: String,
    event_type: String,
    source: String,
    time: DateTime<Utc>,
    subject: Option<String>,
    data_content_type: Option<String>,
    data: EventData,
    extensions: BTreeMap<String, ExtensionValue>,
}

impl Envelope {
    /// Starts building an envelope with a fresh time-ordered id.
    pub fn builder(event_type: impl Into<String>, source: impl Into<String>) -> EnvelopeBuilder {
        EnvelopeBuilder {
            id: Uuid::now_v7().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            time: None,
            subject: None,
            data_content_type: None,
            data: Ok(EventData::None),
            extensions: BTreeMap::new(),
        }
    }

    /// Unique identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Event type, e.g. `cloud.beacontower.device.created`.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Producer identifier.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Subject (target) identifier within the source.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Media type of the payload.
    #[must_use]
    pub fn data_content_type(&self) -> Option<&str> {
        self.data_content_type.as_deref()
    }

    /// The payload.
    #[must_use]
    pub const fn data(&self) -> &EventData {
        &self.data
    }

    /// All extension attributes.
    #[must_use]
    pub const fn extensions(&self) -> &BTreeMap<String, ExtensionValue> {
        &self.extensions
    }

    /// A single extension attribute.
    #[must_use]
    pub fn extension(&self, name: &str) -> Option<&ExtensionValue> {
        self.extensions.get(name)
    }

    /// Correlation id, if set.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.extension(CORRELATION_ID).and_then(ExtensionValue::as_str)
    }

    /// Acting user id, if set.
    #[must_use]
    pub fn actor_id(&self) -> Option<&str> {
        self.extension(ACTOR_ID).and_then(ExtensionValue::as_str)
    }

    /// Acting user display name, if set.
    #[must_use]
    pub fn actor_name(&self) -> Option<&str> {
        self.extension(ACTOR_NAME).and_then(ExtensionValue::as_str)
    }

    /// Checks the invariants every published envelope must hold.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingAttribute` for a blank id, type or source and
    /// `Error::InvalidExtensionName` for a malformed extension name.
    pub fn validate(&self) -> Result<(), Error> {
        if self.id.trim().is_empty() {
            return Err(Error::MissingAttribute("id"));
        }
        if self.event_type.trim().is_empty() {
            return Err(Error::MissingAttribute("type"));
        }
        if self.source.trim().is_empty() {
            return Err(Error::MissingAttribute("source"));
        }
        for name in self.extensions.keys() {
            validate_extension_name(name)?;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: String,
        event_type: String,
        source: String,
        time: DateTime<Utc>,
        subject: Option<String>,
        data_content_type: Option<String>,
        data: EventData,
        extensions: BTreeMap<String, ExtensionValue>,
    ) -> Self {
        Self {
            id,
            event_type,
            source,
            time,
            subject,
            data_content_type,
            data,
            extensions,
        }
    }
}

/// Builder for [`Envelope`].
#[derive(Debug)]
pub struct EnvelopeBuilder {
    id: String,
    event_type: String,
    source: String,
    time: Option<DateTime<Utc>>,
    subject: Option<String>,
    data_content_type: Option<String>,
    data: Result<EventData, serde_json::Error>,
    extensions: BTreeMap<String, ExtensionValue>,
}

impl EnvelopeBuilder {
    /// Overrides the generated id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Overrides the creation time (defaults to now).
    #[must_use]
    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Sets the subject identifier.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Serializes `value` as the JSON payload.
    #[must_use]
    pub fn data_json<T>(mut self, value: &T) -> Self
    where
        T: Serialize + ?Sized,
    {
        self.data = EventData::from_serializable(value);
        self.data_content_type = Some("application/json".to_string());
        self
    }

    /// Uses an opaque string payload.
    #[must_use]
    pub fn data_text(mut self, text: impl Into<String>, content_type: impl Into<String>) -> Self {
        self.data = Ok(EventData::Text(text.into()));
        self.data_content_type = Some(content_type.into());
        self
    }

    /// Uses a binary payload.
    #[must_use]
    pub fn data_binary(mut self, bytes: Bytes, content_type: impl Into<String>) -> Self {
        self.data = Ok(EventData::Binary(bytes));
        self.data_content_type = Some(content_type.into());
        self
    }

    /// Sets the correlation id extension.
    #[must_use]
    pub fn correlation_id(self, correlation_id: impl Into<String>) -> Self {
        self.extension(CORRELATION_ID, correlation_id.into())
    }

    /// Sets the actor id and name extensions.
    #[must_use]
    pub fn actor(self, actor_id: impl Into<String>, actor_name: impl Into<String>) -> Self {
        self.extension(ACTOR_ID, actor_id.into())
            .extension(ACTOR_NAME, actor_name.into())
    }

    /// Sets an arbitrary extension attribute.
    #[must_use]
    pub fn extension(mut self, name: impl Into<String>, value: impl Into<ExtensionValue>) -> Self {
        self.extensions.insert(name.into(), value.into());
        self
    }

    /// Finishes the envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload failed to serialize or the envelope
    /// breaks [`Envelope::validate`].
    pub fn build(self) -> Result<Envelope, Error> {
        let envelope = Envelope {
            id: self.id,
            event_type: self.event_type,
            source: self.source,
            time: self.time.unwrap_or_else(Utc::now),
            subject: self.subject,
            data_content_type: self.data_content_type,
            data: self.data?,
            extensions: self.extensions,
        };
        envelope.validate()?;

        Ok(envelope)
    }
}
