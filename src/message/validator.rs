// message/validator.rs - Structural message validation

use super::{json_type_name, Message};
use serde_json::Value;

/// Fields every message must carry
pub const REQUIRED_FIELDS: [&str; 7] = [
    "kind",
    "source",
    "target",
    "payload",
    "timestamp",
    "status",
    "context",
];

/// Validation error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Message missing required fields: {0:?}")]
    MissingFields(Vec<&'static str>),

    #[error("Field '{field}' must be {expected}, found {found}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Field '{0}' must not be empty")]
    Empty(&'static str),

    #[error("Invalid timestamp '{0}': expected RFC 3339 UTC")]
    InvalidTimestamp(String),

    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Schema check applied before any delivery
pub struct MessageValidator;

impl MessageValidator {
    /// Validate a constructed message
    pub fn validate(message: &Message) -> Result<(), ValidationError> {
        non_empty("kind", message.kind())?;
        non_empty("source", message.source())?;
        non_empty("target", message.target())?;
        check_timestamp(message.timestamp())
    }

    /// Validate a raw JSON value against the message schema
    ///
    /// `type` is accepted in place of `kind`.
    pub fn validate_value(value: &Value) -> Result<(), ValidationError> {
        let object = value.as_object().ok_or(ValidationError::NotAnObject)?;

        let missing: Vec<&'static str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| {
                !(object.contains_key(*field) || (*field == "kind" && object.contains_key("type")))
            })
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields(missing));
        }

        let kind = object.get("kind").or_else(|| object.get("type"));
        for (field, value) in [
            ("kind", kind),
            ("source", object.get("source")),
            ("target", object.get("target")),
            ("timestamp", object.get("timestamp")),
            ("status", object.get("status")),
        ] {
            match value {
                Some(Value::String(s)) => {
                    if field != "status" {
                        non_empty(field, s)?;
                    }
                }
                Some(other) => {
                    return Err(ValidationError::WrongType {
                        field,
                        expected: "string",
                        found: json_type_name(other),
                    });
                }
                None => return Err(ValidationError::MissingFields(vec![field])),
            }
        }

        for field in ["payload", "context"] {
            if let Some(value) = object.get(field) {
                if !value.is_object() {
                    return Err(ValidationError::WrongType {
                        field,
                        expected: "object",
                        found: json_type_name(value),
                    });
                }
            }
        }

        if let Some(Value::String(ts)) = object.get("timestamp") {
            check_timestamp(ts)?;
        }

        Ok(())
    }

    /// Validate a JSON string
    pub fn validate_json(json: &str) -> Result<(), ValidationError> {
        let value: Value =
            serde_json::from_str(json).map_err(|_| ValidationError::Malformed("invalid JSON".into()))?;
        Self::validate_value(&value)
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Empty(field))
    } else {
        Ok(())
    }
}

fn check_timestamp(ts: &str) -> Result<(), ValidationError> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .map(|_| ())
        .map_err(|_| ValidationError::InvalidTimestamp(ts.to_string()))
}
