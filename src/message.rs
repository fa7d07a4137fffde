//! Message envelopes and their AMQP wire mapping.
//!
//! The broker envelope is: JSON body; `correlation_id` and optional
//! `reply_to` as basic properties; `session_id`, `error_to`, `cluster_id`
//! and `app_id` as headers.

use lapin::types::{AMQPValue, FieldTable};
use lapin::BasicProperties;
use serde_json::Value;

use crate::codec;

/// Content type marker for published bodies.
pub const CONTENT_TYPE: &str = "application/json";

const HEADER_SESSION_ID: &str = "session_id";
const HEADER_ERROR_TO: &str = "error_to";
const HEADER_CLUSTER_ID: &str = "cluster_id";
const HEADER_APP_ID: &str = "app_id";

/// A message accepted by `send()` and awaiting publication.
///
/// Consumed exactly once by the publisher tick; after publication only its
/// confirm sequence number is tracked.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Target endpoint id, used as the routing key.
    pub endpoint_id: String,
    pub cluster_id: String,
    pub app_id: String,
    pub correlation_id: String,
    pub session_id: Option<String>,
    pub payload: Value,
    pub reply_to: Option<String>,
    pub error_to: Option<String>,
}

impl OutboundMessage {
    /// Routing key on the topic exchange: the target endpoint's queue name.
    pub fn routing_key(&self) -> &str {
        &self.endpoint_id
    }

    /// Build the AMQP properties block for this message.
    pub fn properties(&self) -> BasicProperties {
        let mut headers = FieldTable::default();
        if let Some(session_id) = &self.session_id {
            headers.insert(
                HEADER_SESSION_ID.into(),
                AMQPValue::LongString(session_id.as_str().into()),
            );
        }
        if let Some(error_to) = &self.error_to {
            headers.insert(
                HEADER_ERROR_TO.into(),
                AMQPValue::LongString(error_to.as_str().into()),
            );
        }
        headers.insert(
            HEADER_CLUSTER_ID.into(),
            AMQPValue::LongString(self.cluster_id.as_str().into()),
        );
        headers.insert(
            HEADER_APP_ID.into(),
            AMQPValue::LongString(self.app_id.as_str().into()),
        );

        let mut properties = BasicProperties::default()
            .with_correlation_id(self.correlation_id.as_str().into())
            .with_content_type(CONTENT_TYPE.into())
            .with_headers(headers);
        if let Some(reply_to) = &self.reply_to {
            properties = properties.with_reply_to(reply_to.as_str().into());
        }
        properties
    }

    /// Encode the payload body for publishing.
    pub fn body(&self) -> Vec<u8> {
        codec::encode(&self.payload)
    }
}

/// A decoded broker delivery, before routing.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub cluster_id: Option<String>,
    pub app_id: Option<String>,
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
    pub reply_to: Option<String>,
    pub error_to: Option<String>,
    pub payload: Value,
}

impl InboundMessage {
    /// Decode a delivery's properties and body.
    ///
    /// Malformed bodies become an empty object; missing headers stay `None`
    /// and are resolved (or dropped) by the dispatcher.
    pub fn from_parts(properties: &BasicProperties, body: &[u8]) -> Self {
        let headers = properties.headers().as_ref();
        Self {
            cluster_id: headers.and_then(|t| header_string(t, HEADER_CLUSTER_ID)),
            app_id: headers.and_then(|t| header_string(t, HEADER_APP_ID)),
            correlation_id: properties
                .correlation_id()
                .as_ref()
                .map(|s| s.as_str().to_string()),
            session_id: headers.and_then(|t| header_string(t, HEADER_SESSION_ID)),
            reply_to: properties
                .reply_to()
                .as_ref()
                .map(|s| s.as_str().to_string()),
            error_to: headers.and_then(|t| header_string(t, HEADER_ERROR_TO)),
            payload: codec::decode_or_empty(body),
        }
    }
}

fn header_string(table: &FieldTable, key: &str) -> Option<String> {
    match table.inner().get(key)? {
        AMQPValue::LongString(s) => std::str::from_utf8(s.as_bytes())
            .ok()
            .map(|s| s.to_string()),
        AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_outbound() -> OutboundMessage {
        OutboundMessage {
            endpoint_id: "peer".to_string(),
            cluster_id: "demo".to_string(),
            app_id: "echo".to_string(),
            correlation_id: "corr-1".to_string(),
            session_id: Some("sess-9".to_string()),
            payload: json!({"x": 1}),
            reply_to: Some("pin://self/demo/on_echo".to_string()),
            error_to: Some("pin://self/demo/on_error".to_string()),
        }
    }

    #[test]
    fn test_routing_key_is_target_endpoint() {
        assert_eq!(sample_outbound().routing_key(), "peer");
    }

    #[test]
    fn test_envelope_round_trip() {
        let outbound = sample_outbound();
        let inbound = InboundMessage::from_parts(&outbound.properties(), &outbound.body());

        assert_eq!(inbound.cluster_id.as_deref(), Some("demo"));
        assert_eq!(inbound.app_id.as_deref(), Some("echo"));
        assert_eq!(inbound.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(inbound.session_id.as_deref(), Some("sess-9"));
        assert_eq!(inbound.reply_to.as_deref(), Some("pin://self/demo/on_echo"));
        assert_eq!(
            inbound.error_to.as_deref(),
            Some("pin://self/demo/on_error")
        );
        assert_eq!(inbound.payload, json!({"x": 1}));
    }

    #[test]
    fn test_optional_fields_omitted() {
        let outbound = OutboundMessage {
            session_id: None,
            reply_to: None,
            error_to: None,
            ..sample_outbound()
        };
        let properties = outbound.properties();
        assert!(properties.reply_to().is_none());

        let inbound = InboundMessage::from_parts(&properties, &outbound.body());
        assert_eq!(inbound.session_id, None);
        assert_eq!(inbound.reply_to, None);
        assert_eq!(inbound.error_to, None);
    }

    #[test]
    fn test_bare_properties_decode_to_empty_message() {
        let inbound = InboundMessage::from_parts(&BasicProperties::default(), b"not json");
        assert_eq!(inbound.cluster_id, None);
        assert_eq!(inbound.app_id, None);
        assert_eq!(inbound.payload, json!({}));
    }
}
