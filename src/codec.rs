//! JSON payload codec.
//!
//! Message bodies are arbitrary JSON object trees. Decoding is lenient: a
//! malformed or non-object body becomes an empty object so that inbound
//! dispatch never fails on payload shape. The codec also carries the one
//! domain extension the wire format supports, tagged timestamps.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

/// Tag discriminator for extended value types.
const TYPE_KEY: &str = "$type";
/// Tag value for timestamps.
const TIMESTAMP_TAG: &str = "timestamp";

/// Decode a message body, substituting an empty object for anything that is
/// not a JSON object.
pub fn decode_or_empty(body: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) if value.is_object() => value,
        Ok(_) | Err(_) => Value::Object(Map::new()),
    }
}

/// Encode a payload for publishing.
pub fn encode(payload: &Value) -> Vec<u8> {
    // Value serialization cannot fail
    serde_json::to_vec(payload).unwrap_or_default()
}

/// Encode a timestamp as a tagged value: `{"$type":"timestamp","value":...}`.
pub fn encode_timestamp(ts: DateTime<Utc>) -> Value {
    json!({
        TYPE_KEY: TIMESTAMP_TAG,
        "value": ts.to_rfc3339_opts(SecondsFormat::Micros, true),
    })
}

/// Decode a tagged timestamp value, if `value` carries one.
pub fn decode_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let obj = value.as_object()?;
    if obj.get(TYPE_KEY)?.as_str()? != TIMESTAMP_TAG {
        return None;
    }
    let raw = obj.get("value")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
