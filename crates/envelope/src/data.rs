use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// The payload carried by an envelope, in whichever shape it arrived.
///
/// Handlers never see this directly: the subscriber normalises it into the
/// handler's data type through [`EventData::decode_as`].
#[derive(Clone, Debug, Default, PartialEq)]
pub enum EventData {
    /// No payload.
    #[default]
    None,

    /// A generic structured document.
    Json(Value),

    /// An opaque string, possibly a pre-serialized JSON document.
    Text(String),

    /// Raw bytes.
    Binary(Bytes),
}

impl EventData {
    /// Captures any serializable value as a structured document.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` cannot be represented as JSON.
    pub fn from_serializable<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_value(value).map(Self::Json)
    }

    /// Deserializes the payload into `T`.
    ///
    /// Text payloads are first parsed as a JSON document; if that fails the
    /// text itself is offered to `T` as a JSON string.
    ///
    /// # Errors
    ///
    /// Returns the deserializer error if the payload does not fit `T`.
    pub fn decode_as<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        match self {
            Self::None => T::deserialize(&Value::Null),
            Self::Json(value) => T::deserialize(value),
            Self::Text(text) => serde_json::from_str(text).or_else(|parse_error| {
                T::deserialize(Value::String(text.clone())).map_err(|_| parse_error)
            }),
            Self::Binary(bytes) => serde_json::from_slice(bytes),
        }
    }

    /// Whether the envelope carries no payload.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl From<Value> for EventData {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Bytes> for EventData {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct DeviceCreated {
        device_id: String,
        firmware: u32,
    }

    #[test]
    fn test_decode_json_node() {
        let data = EventData::Json(serde_json::json!({"device_id": "d-1", "firmware": 3}));

        let decoded: DeviceCreated = data.decode_as().unwrap();

        assert_eq!(
            decoded,
            DeviceCreated {
                device_id: "d-1".to_string(),
                firmware: 3
            }
        );
    }

    #[test]
    fn test_decode_preserialized_text() {
        let data = EventData::Text(r#"{"device_id":"d-2","firmware":9}"#.to_string());

        let decoded: DeviceCreated = data.decode_as().unwrap();

        assert_eq!(decoded.device_id, "d-2");
        assert_eq!(decoded.firmware, 9);
    }

    #[test]
    fn test_decode_plain_text_as_string() {
        let data = EventData::Text("hello beacon".to_string());

        let decoded: String = data.decode_as().unwrap();

        assert_eq!(decoded, "hello beacon");
    }

    #[test]
    fn test_decode_binary_json() {
        let data = EventData::Binary(Bytes::from_static(br#"{"device_id":"d-3","firmware":1}"#));

        let decoded: DeviceCreated = data.decode_as().unwrap();

        assert_eq!(decoded.device_id, "d-3");
    }

    #[test]
    fn test_decode_none_into_option() {
        let decoded: Option<DeviceCreated> = EventData::None.decode_as().unwrap();

        assert!(decoded.is_none());
    }

    #[test]
    fn test_decode_mismatch_is_error() {
        let data = EventData::Json(serde_json::json!({"unexpected": true}));

        assert!(data.decode_as::<DeviceCreated>().is_err());
    }

    #[test]
    fn test_from_serializable() {
        let data = EventData::from_serializable(&DeviceCreated {
            device_id: "d-4".to_string(),
            firmware: 2,
        })
        .unwrap();

        assert_eq!(
            data,
            EventData::Json(serde_json::json!({"device_id": "d-4", "firmware": 2}))
        );
    }
}
