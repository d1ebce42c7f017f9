// lifecycle/mod.rs - Actor Lifecycle

//! Per-actor lifecycle state machine and checkpoints.
//!
//! ```text
//! IDLE --start--> RUNNING --pause--> PAUSED --resume--> RUNNING
//! RUNNING <--wait/ready--> WAITING --pause--> PAUSED
//! {IDLE, RUNNING, PAUSED, WAITING} --stop--> STOPPED
//! {IDLE, RUNNING, PAUSED, WAITING} --fault--> ERROR --restart--> default start
//! ```
//!
//! Entering STOPPED or ERROR force-releases the actor's sector locks and
//! cancels its in-flight work before the new state becomes visible.

mod checkpoint;
mod state_machine;

pub use checkpoint::Checkpoint;
pub use state_machine::{ActorLifecycleState, LifecycleError, LifecycleStateMachine};
