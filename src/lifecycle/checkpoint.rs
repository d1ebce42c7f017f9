// lifecycle/checkpoint.rs - Durable actor snapshot

use super::ActorLifecycleState;
use crate::message::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted record per actor
///
/// `custom_data` is opaque to the runtime; actors fill it through their
/// checkpoint hooks. Strategy objects are stored by registry key only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub actor: String,
    pub state: ActorLifecycleState,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub custom_data: Payload,
}

impl Checkpoint {
    pub fn new(actor: impl Into<String>, state: ActorLifecycleState) -> Self {
        Self {
            actor: actor.into(),
            state,
            timestamp: Utc::now(),
            custom_data: Payload::new(),
        }
    }

    pub fn with_custom_data(mut self, custom_data: Payload) -> Self {
        self.custom_data = custom_data;
        self
    }

    /// State to resume in after loading this checkpoint
    ///
    /// RUNNING, IDLE and PAUSED are honored. STOPPED and ERROR would end the
    /// loop immediately, and WAITING depends on in-flight messages that did not
    /// survive the restart, so those fall back to `default`.
    pub fn resume_state(&self, default: ActorLifecycleState) -> ActorLifecycleState {
        match self.state {
            ActorLifecycleState::Running
            | ActorLifecycleState::Idle
            | ActorLifecycleState::Paused => self.state,
            ActorLifecycleState::Stopped
            | ActorLifecycleState::Error
            | ActorLifecycleState::Waiting => default,
        }
    }
}
