// actor/mod.rs - Actor Runtime

//! Cooperative `perceive -> decide -> act` control loops.
//!
//! - [`Actor`] - the behavior an actor supplies
//! - [`ActorHooks`] - checkpoint encode/decode and status fields, callable from
//!   bus callbacks while the loop is busy
//! - [`ActorContext`] - bus, lifecycle and lock access for one actor
//! - [`ActorController`] - pause/resume/stop with checkpointing, control topics
//! - [`ActorRuntime`] / [`ActorHandle`] - hosts and drives one actor
//!
//! # Example
//!
//! ```ignore
//! use swarm_coordination::prelude::*;
//!
//! let runtime = ActorRuntime::new(my_actor, bus.clone(), persistence.clone(), RuntimeConfig::default());
//! let handle = runtime.spawn();
//!
//! handle.pause("operator").await?;
//! handle.resume("operator").await?;
//! handle.stop("shutdown").await?;
//! let exit = handle.join().await?;
//! ```

mod context;
mod control;
mod runtime;

pub use context::ActorContext;
pub use control::ActorController;
pub use runtime::{ActorExit, ActorHandle, ActorRuntime, RuntimeConfig};

use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::BusError;
use crate::lifecycle::{ActorLifecycleState, LifecycleError};
use crate::locks::LockError;
use crate::message::Payload;
use crate::persistence::StorageError;

/// Actor errors
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    /// The actor was stopped while work was in flight
    #[error("Actor stopped")]
    Cancelled,

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid checkpoint: {0}")]
    Checkpoint(String),

    #[error("Actor panicked: {0}")]
    Panic(String),

    #[error("Actor task failed: {0}")]
    Join(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ActorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// State access that must work while the control loop is busy
///
/// Implementations share the actor's state (usually an `Arc<Mutex<_>>`) so
/// the controller can checkpoint and report from bus callbacks.
pub trait ActorHooks: Send + Sync {
    /// Opaque data stored in the checkpoint's `custom_data`
    fn encode_checkpoint(&self) -> Payload {
        Payload::new()
    }

    /// Restore from a loaded checkpoint
    fn decode_checkpoint(&self, _data: &Payload) -> Result<(), ActorError> {
        Ok(())
    }

    /// Extra fields merged into status reports
    fn status_fields(&self) -> Payload {
        Payload::new()
    }
}

/// Hooks for actors with nothing to persist
pub struct NoHooks;

impl ActorHooks for NoHooks {}

/// Behavior of one autonomous actor
#[async_trait]
pub trait Actor: Send + 'static {
    type Decision: Send;

    fn name(&self) -> &str;

    /// State entered on a fresh start or after a restart from ERROR
    fn default_start_state(&self) -> ActorLifecycleState {
        ActorLifecycleState::Running
    }

    fn hooks(&self) -> Arc<dyn ActorHooks> {
        Arc::new(NoHooks)
    }

    /// Install subscriptions; runs on every (re)start before the loop
    async fn on_start(&mut self, _ctx: &ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    async fn perceive(&mut self, _ctx: &ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    async fn decide(&mut self, ctx: &ActorContext) -> Result<Self::Decision, ActorError>;

    async fn act(&mut self, decision: Self::Decision, ctx: &ActorContext) -> Result<(), ActorError>;

    /// Called once after a fault moved the actor to ERROR
    async fn on_error(&mut self, _error: &ActorError, _ctx: &ActorContext) {}
}
