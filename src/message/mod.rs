// message/mod.rs - Swarm Message Envelope

//! Immutable message envelope exchanged over the [`MessageBus`](crate::bus::MessageBus).
//!
//! Every message carries seven fields: `kind`, `source`, `target`, `payload`,
//! `timestamp`, `status` and `context`. Fields are private; a message is built
//! once with [`Message::new`] and the `with_*` builders, then shared as
//! `Arc<Message>` by the bus.
//!
//! # Example
//!
//! ```ignore
//! use swarm_coordination::message::{topics, Message, BROADCAST};
//! use serde_json::json;
//!
//! let msg = Message::new(topics::REQUIREMENTS, "builder", "miner")
//!     .with_payload_value(json!({ "requirements": { "WOOD_PLANKS": 40 } }))?;
//! ```

pub mod topics;
mod validator;

pub use validator::{MessageValidator, ValidationError, REQUIRED_FIELDS};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON object used for payloads, context and checkpoint data
pub type Payload = serde_json::Map<String, Value>;

/// Target name addressing every actor
pub const BROADCAST: &str = "all";

/// Default status of a freshly created message
pub const STATUS_NEW: &str = "new";

/// Swarm message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(alias = "type")]
    kind: String,
    source: String,
    target: String,
    payload: Payload,
    timestamp: String,
    status: String,
    context: Payload,
}

impl Message {
    /// Create a message with an empty payload, timestamped now
    pub fn new(
        kind: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let mut context = Payload::new();
        context.insert(
            "message_id".into(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );

        Self {
            kind: kind.into(),
            source: source.into(),
            target: target.into(),
            payload: Payload::new(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            status: STATUS_NEW.to_string(),
            context,
        }
    }

    /// Create a message addressed to every actor
    pub fn broadcast(kind: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(kind, source, BROADCAST)
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Set the payload from any JSON value; only objects are accepted
    pub fn with_payload_value(mut self, value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(map) => {
                self.payload = map;
                Ok(self)
            }
            other => Err(ValidationError::WrongType {
                field: "payload",
                expected: "object",
                found: json_type_name(&other),
            }),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Add a context entry (correlation ids, hop counts, ...)
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn context(&self) -> &Payload {
        &self.context
    }

    /// Message id assigned at creation, if the context still carries one
    pub fn message_id(&self) -> Option<&str> {
        self.context.get("message_id").and_then(Value::as_str)
    }

    /// Whether `actor` is addressed, either by name or by broadcast
    pub fn is_addressed_to(&self, actor: &str) -> bool {
        self.target == BROADCAST || self.target == actor
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String, ValidationError> {
        serde_json::to_string(self).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Parse and validate a JSON string
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        MessageValidator::validate_value(&value)?;
        serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = Message::new("test.message", "test_source", "test_target")
            .with_payload_value(json!({ "key": "value" }))
            .unwrap();

        assert_eq!(msg.kind(), "test.message");
        assert_eq!(msg.source(), "test_source");
        assert_eq!(msg.payload()["key"], "value");
        assert_eq!(msg.status(), STATUS_NEW);
        assert!(chrono::DateTime::parse_from_rfc3339(msg.timestamp()).is_ok());
        assert!(msg.message_id().is_some());
    }

    #[test]
    fn test_json_serialization() {
        let msg = Message::new("test.message", "src", "dst")
            .with_payload_value(json!({ "data": 123 }))
            .unwrap();

        let json = msg.to_json().unwrap();
        let back = Message::from_json(&json).unwrap();

        assert_eq!(msg, back);
    }

    #[test]
    fn test_type_alias_accepted() {
        let json = json!({
            "type": "test",
            "source": "src",
            "target": "dst",
            "timestamp": "2023-10-27T10:00:00Z",
            "payload": {},
            "status": "new",
            "context": {},
        })
        .to_string();

        let msg = Message::from_json(&json).unwrap();
        assert_eq!(msg.kind(), "test");
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let result = Message::new("k", "a", "b").with_payload_value(json!([1, 2]));
        assert!(matches!(
            result,
            Err(ValidationError::WrongType { field: "payload", .. })
        ));
    }

    #[test]
    fn test_addressing() {
        let direct = Message::new("k", "a", "miner");
        assert!(direct.is_addressed_to("miner"));
        assert!(!direct.is_addressed_to("builder"));

        let all = Message::broadcast("k", "a");
        assert!(all.is_addressed_to("builder"));
    }
}
