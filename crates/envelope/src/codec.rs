use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extension::validate_extension_name;
use crate::{Envelope, Error, EventData, ExtensionValue};

/// The only spec version this codec reads or writes.
pub const SPEC_VERSION: &str = "1.0";

/// Media type of an encoded envelope.
pub const CONTENT_TYPE: &str = "application/cloudevents+json";

#[derive(Debug, Deserialize, Serialize)]
struct WireEnvelope {
    #[serde(default)]
    specversion: String,

    #[serde(default)]
    id: String,

    #[serde(default, rename = "type")]
    event_type: String,

    #[serde(default)]
    source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    datacontenttype: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_base64: Option<String>,

    #[serde(flatten)]
    extensions: BTreeMap<String, Value>,
}

/// Encodes the envelope as a single JSON document.
///
/// # Errors
///
/// Returns `Error::Json` if serialization fails.
pub fn encode(envelope: &Envelope) -> Result<Bytes, Error> {
    let (data, data_base64) = match envelope.data() {
        EventData::None => (None, None),
        EventData::Json(value) => (Some(value.clone()), None),
        EventData::Text(text) if is_json_content_type(envelope.data_content_type()) => {
            let value = serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()));
            (Some(value), None)
        }
        EventData::Text(text) => (Some(Value::String(text.clone())), None),
        EventData::Binary(bytes) => (None, Some(BASE64.encode(bytes))),
    };

    let wire = WireEnvelope {
        specversion: SPEC_VERSION.to_string(),
        id: envelope.id().to_string(),
        event_type: envelope.event_type().to_string(),
        source: envelope.source().to_string(),
        time: Some(envelope.time().to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        subject: envelope.subject().map(ToString::to_string),
        datacontenttype: envelope.data_content_type().map(ToString::to_string),
        data,
        data_base64,
        extensions: envelope
            .extensions()
            .iter()
            .map(|(name, value)| (name.clone(), extension_to_json(value)))
            .collect(),
    };

    Ok(Bytes::from(serde_json::to_vec(&wire)?))
}

/// Decodes a JSON document produced by [`encode`] (or any conforming producer).
///
/// # Errors
///
/// Returns an error if the payload is not JSON, lacks a required attribute,
/// declares another spec version, or carries malformed data or extensions.
pub fn decode(payload: &[u8]) -> Result<Envelope, Error> {
    let wire: WireEnvelope = serde_json::from_slice(payload)?;

    if wire.specversion != SPEC_VERSION {
        return Err(Error::UnsupportedSpecVersion(wire.specversion));
    }

    let time = match wire.time {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map_err(|_| Error::InvalidTime(raw.clone()))?
            .with_timezone(&Utc),
        None => return Err(Error::MissingAttribute("time")),
    };

    let data = match (wire.data, wire.data_base64) {
        (_, Some(encoded)) => EventData::Binary(Bytes::from(BASE64.decode(encoded)?)),
        (Some(Value::String(text)), None)
            if !is_json_content_type(wire.datacontenttype.as_deref()) =>
        {
            EventData::Text(text)
        }
        (Some(value), None) => EventData::Json(value),
        (None, None) => EventData::None,
    };

    let mut extensions = BTreeMap::new();
    for (name, value) in wire.extensions {
        validate_extension_name(&name)?;
        let value = ExtensionValue::from_json(&name, value)?;
        extensions.insert(name, value);
    }

    let envelope = Envelope::from_parts(
        wire.id,
        wire.event_type,
        wire.source,
        time,
        wire.subject,
        wire.datacontenttype,
        data,
        extensions,
    );
    envelope.validate()?;

    Ok(envelope)
}

fn extension_to_json(value: &ExtensionValue) -> Value {
    match value {
        ExtensionValue::Bool(b) => Value::Bool(*b),
        ExtensionValue::Integer(i) => Value::from(*i),
        ExtensionValue::String(s) => Value::String(s.clone()),
    }
}

fn is_json_content_type(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return true;
    };
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    media_type == "application/json" || media_type == "text/json" || media_type.ends_with("+json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn sample() -> Envelope {
        Envelope::builder("cloud.beacontower.device.created", "/devices/registry")
            .time(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap())
            .subject("device-42")
            .data_json(&serde_json::json!({"device_id": "device-42", "online": true}))
            .correlation_id("corr-9")
            .actor("user-1", "Grace")
            .extension("attempt", 2_i64)
            .build()
            .unwrap()
    }

    #[test]
    fn test_document_shape() {
        let bytes = encode(&sample()).unwrap();
        let document: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(document["specversion"], "1.0");
        assert_eq!(document["type"], "cloud.beacontower.device.created");
        assert_eq!(document["source"], "/devices/registry");
        assert_eq!(document["time"], "2024-05-01T12:30:00Z");
        assert_eq!(document["subject"], "device-42");
        assert_eq!(document["datacontenttype"], "application/json");
        assert_eq!(document["data"]["device_id"], "device-42");
        assert_eq!(document["correlationid"], "corr-9");
        assert_eq!(document["actorname"], "Grace");
        assert_eq!(document["attempt"], 2);
        assert!(document.get("data_base64").is_none());
    }

    #[test]
    fn test_decode_restores_envelope() {
        let envelope = sample();

        let decoded = decode(&encode(&envelope).unwrap()).unwrap();

        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_binary_payload_uses_base64() {
        let envelope = Envelope::builder("cloud.beacontower.blob.stored", "/blobs")
            .data_binary(Bytes::from_static(&[0, 159, 146, 150]), "application/octet-stream")
            .build()
            .unwrap();

        let bytes = encode(&envelope).unwrap();
        let document: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(document["data_base64"], "AJ+Slg==");

        let decoded = decode(&bytes).unwrap();
        assert_eq!(
            decoded.data(),
            &EventData::Binary(Bytes::from_static(&[0, 159, 146, 150]))
        );
    }

    #[test]
    fn test_plain_text_payload() {
        let envelope = Envelope::builder("cloud.beacontower.note.added", "/notes")
            .data_text("remember the milk", "text/plain")
            .build()
            .unwrap();

        let decoded = decode(&encode(&envelope).unwrap()).unwrap();

        assert_eq!(
            decoded.data(),
            &EventData::Text("remember the milk".to_string())
        );
    }

    #[test]
    fn test_preserialized_json_text_is_embedded() {
        let envelope = Envelope::builder("cloud.beacontower.device.updated", "/devices")
            .data_text(r#"{"firmware":4}"#, "application/json")
            .build()
            .unwrap();

        let document: Value = serde_json::from_slice(&encode(&envelope).unwrap()).unwrap();

        assert_eq!(document["data"]["firmware"], 4);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_matches!(decode(b"not json at all"), Err(Error::Json(_)));
    }

    #[test]
    fn test_decode_rejects_missing_id() {
        let payload = br#"{"specversion":"1.0","type":"cloud.a","source":"/s","time":"2024-01-01T00:00:00Z"}"#;

        assert_matches!(decode(payload), Err(Error::MissingAttribute("id")));
    }

    #[test]
    fn test_decode_rejects_other_spec_versions() {
        let payload = br#"{"specversion":"0.3","id":"1","type":"cloud.a","source":"/s","time":"2024-01-01T00:00:00Z"}"#;

        assert_matches!(decode(payload), Err(Error::UnsupportedSpecVersion(_)));
    }

    #[test]
    fn test_decode_rejects_nested_extension() {
        let payload = br#"{"specversion":"1.0","id":"1","type":"cloud.a","source":"/s","time":"2024-01-01T00:00:00Z","tenant":{"id":1}}"#;

        assert_matches!(decode(payload), Err(Error::InvalidExtensionValue(_)));
    }
}
