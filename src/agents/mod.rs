// agents/mod.rs - Reference Actors

//! Three actors that exercise the whole substrate:
//!
//! - [`Explorer`] - scans terrain on request and publishes the flat spots it
//!   finds as `map.v1`
//! - [`ResourceProducer`] - answers `requirements.v1` by mining inside a
//!   locked sector until the bill is covered, then delivers `inventory.v1`
//! - [`BuildConsumer`] - turns discovered sites and a selected blueprint into
//!   build jobs, publishes their requirements and builds once supplied
//!
//! Each keeps its mutable state behind one `parking_lot` mutex shared with
//! its bus callbacks and checkpoint hooks.

mod consumer;
mod explorer;
mod producer;

pub use consumer::{BuildConsumer, ConsumerDecision, JobStatus};
pub use explorer::{Explorer, ExplorerDecision};
pub use producer::{MaterialRequest, ProducerDecision, ResourceProducer};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::actor::ActorError;
use crate::message::Payload;

/// Serialize actor state into checkpoint custom data
pub(crate) fn encode_state<T: Serialize>(actor: &str, state: &T) -> Payload {
    match serde_json::to_value(state) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(actor, found = %other, "Actor state did not encode to an object");
            Payload::new()
        }
        Err(e) => {
            warn!(actor, error = %e, "Failed to encode actor state");
            Payload::new()
        }
    }
}

/// Parse checkpoint custom data; missing fields fall back to defaults
pub(crate) fn decode_state<T: DeserializeOwned>(data: &Payload) -> Result<T, ActorError> {
    serde_json::from_value(Value::Object(data.clone()))
        .map_err(|e| ActorError::Checkpoint(e.to_string()))
}
