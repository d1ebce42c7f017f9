// lifecycle/state_machine.rs - Lifecycle State Machine

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::MessageBus;
use crate::locks::SectorLockRegistry;
use crate::message::{topics, Message, MessageValidator, Payload, ValidationError};
use crate::observability::record_transition;
use crate::persistence::StorageError;

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorLifecycleState {
    Idle,
    Running,
    Paused,
    Waiting,
    Stopped,
    Error,
}

impl ActorLifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Waiting => "WAITING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        }
    }

    /// STOPPED and ERROR end the control loop
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// States in which the control loop runs cycles
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Waiting)
    }
}

impl fmt::Display for ActorLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorLifecycleState {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IDLE" => Ok(Self::Idle),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "WAITING" => Ok(Self::Waiting),
            "STOPPED" => Ok(Self::Stopped),
            "ERROR" => Ok(Self::Error),
            _ => Err(LifecycleError::UnknownState(s.to_string())),
        }
    }
}

/// Lifecycle error types
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invalid transition: cannot {command} from {from}")]
    InvalidTransition {
        command: &'static str,
        from: ActorLifecycleState,
    },

    #[error("Unknown lifecycle state: {0}")]
    UnknownState(String),

    #[error("State change notice rejected: {0}")]
    Notification(#[from] ValidationError),

    #[error("Checkpoint persistence failed: {0}")]
    Persistence(#[from] StorageError),
}

use ActorLifecycleState::*;

const STOPPABLE: &[ActorLifecycleState] = &[Idle, Running, Paused, Waiting];

/// Thread-safe lifecycle of one actor
///
/// All transitions are serialized by one lock. Watchers are notified through a
/// `watch` channel and the rest of the swarm through `agent.state_change.v1`.
pub struct LifecycleStateMachine {
    actor: String,
    default_start: ActorLifecycleState,
    state: Mutex<ActorLifecycleState>,
    cancel: Mutex<CancellationToken>,
    bus: Arc<MessageBus>,
    locks: Arc<SectorLockRegistry>,
    watch_tx: watch::Sender<ActorLifecycleState>,
}

impl LifecycleStateMachine {
    /// Create a lifecycle in IDLE
    pub fn new(
        actor: impl Into<String>,
        default_start: ActorLifecycleState,
        bus: Arc<MessageBus>,
        locks: Arc<SectorLockRegistry>,
    ) -> Self {
        let (watch_tx, _) = watch::channel(Idle);
        Self {
            actor: actor.into(),
            default_start,
            state: Mutex::new(Idle),
            cancel: Mutex::new(CancellationToken::new()),
            bus,
            locks,
            watch_tx,
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn state(&self) -> ActorLifecycleState {
        *self.state.lock()
    }

    pub fn default_start(&self) -> ActorLifecycleState {
        self.default_start
    }

    /// Token cancelled when the actor enters STOPPED or ERROR
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ActorLifecycleState> {
        self.watch_tx.subscribe()
    }

    /// Wait until `predicate` holds for the current state; false on timeout
    pub async fn wait_until<F>(&self, mut predicate: F, timeout: Duration) -> bool
    where
        F: FnMut(&ActorLifecycleState) -> bool,
    {
        let mut rx = self.subscribe();
        let reached = async {
            loop {
                if predicate(&rx.borrow_and_update()) {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, reached).await.unwrap_or(false)
    }

    /// Move to `new_state`
    ///
    /// Returns `Ok(false)` without side effects when already in `new_state`.
    /// Entering STOPPED or ERROR force-releases sector locks and cancels
    /// in-flight work before the swap. Accepts any target; the named commands
    /// enforce the command table.
    pub fn transition(
        &self,
        new_state: ActorLifecycleState,
        reason: &str,
    ) -> Result<bool, LifecycleError> {
        let mut state = self.state.lock();
        self.transition_locked(&mut state, new_state, reason)
    }

    fn transition_locked(
        &self,
        state: &mut ActorLifecycleState,
        new_state: ActorLifecycleState,
        reason: &str,
    ) -> Result<bool, LifecycleError> {
        let previous = *state;
        if previous == new_state {
            debug!(actor = %self.actor, state = %new_state, "Transition is a no-op");
            return Ok(false);
        }

        let mut payload = Payload::new();
        payload.insert("previous_state".into(), Value::from(previous.as_str()));
        payload.insert("new_state".into(), Value::from(new_state.as_str()));
        payload.insert("reason".into(), Value::from(reason));
        let notice = Message::broadcast(topics::STATE_CHANGE, self.actor.as_str()).with_payload(payload);
        MessageValidator::validate(&notice)?;

        if new_state.is_terminal() {
            self.locks.release_all(reason);
            self.cancel.lock().cancel();
        } else if previous.is_terminal() {
            *self.cancel.lock() = CancellationToken::new();
        }

        *state = new_state;

        if let Err(e) = self.bus.publish(notice) {
            warn!(actor = %self.actor, error = %e, "Failed to publish state change");
        }
        self.watch_tx.send_replace(new_state);

        info!(
            actor = %self.actor,
            from = %previous,
            to = %new_state,
            reason,
            "State transition"
        );
        record_transition(&self.actor, new_state.as_str());

        Ok(true)
    }

    /// Apply a named command, checking the command table
    fn command(
        &self,
        command: &'static str,
        allowed_from: &[ActorLifecycleState],
        target: ActorLifecycleState,
        reason: &str,
    ) -> Result<bool, LifecycleError> {
        let mut state = self.state.lock();
        if *state == target {
            return Ok(false);
        }
        if !allowed_from.contains(&*state) {
            return Err(LifecycleError::InvalidTransition {
                command,
                from: *state,
            });
        }
        self.transition_locked(&mut state, target, reason)
    }

    pub fn start(&self) -> Result<bool, LifecycleError> {
        self.command("start", &[Idle], Running, "start")
    }

    pub fn pause(&self, reason: &str) -> Result<bool, LifecycleError> {
        self.command("pause", &[Running, Waiting], Paused, reason)
    }

    pub fn resume(&self, reason: &str) -> Result<bool, LifecycleError> {
        self.command("resume", &[Paused], Running, reason)
    }

    /// Wait for external input (materials, replies)
    pub fn wait(&self, reason: &str) -> Result<bool, LifecycleError> {
        self.command("wait", &[Running], Waiting, reason)
    }

    /// Input arrived, back to RUNNING
    pub fn ready(&self, reason: &str) -> Result<bool, LifecycleError> {
        self.command("ready", &[Waiting], Running, reason)
    }

    pub fn stop(&self, reason: &str) -> Result<bool, LifecycleError> {
        self.command("stop", STOPPABLE, Stopped, reason)
    }

    pub fn fault(&self, reason: &str) -> Result<bool, LifecycleError> {
        self.command("fault", STOPPABLE, Error, reason)
    }

    /// Leave ERROR for the default start state
    pub fn restart(&self, reason: &str) -> Result<bool, LifecycleError> {
        self.command("restart", &[Error], self.default_start, reason)
    }
}

impl fmt::Debug for LifecycleStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleStateMachine")
            .field("actor", &self.actor)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConfig;
    use crate::locks::{LockPolicy, Sector};

    fn machine(name: &str) -> (Arc<MessageBus>, Arc<SectorLockRegistry>, Arc<LifecycleStateMachine>) {
        let bus = Arc::new(MessageBus::new(BusConfig::default()).unwrap());
        let locks = SectorLockRegistry::new(name, bus.clone(), LockPolicy::default());
        let lifecycle = Arc::new(LifecycleStateMachine::new(
            name,
            Running,
            bus.clone(),
            locks.clone(),
        ));
        (bus, locks, lifecycle)
    }

    #[tokio::test]
    async fn test_idempotent_transition() {
        let (bus, _, lifecycle) = machine("worker");

        assert!(lifecycle.transition(Running, "go").unwrap());
        let published = bus.history_of(topics::STATE_CHANGE).len();

        assert!(!lifecycle.transition(Running, "again").unwrap());
        assert_eq!(bus.history_of(topics::STATE_CHANGE).len(), published);
    }

    #[tokio::test]
    async fn test_state_change_payload() {
        let (bus, _, lifecycle) = machine("worker");
        lifecycle.start().unwrap();

        let changes = bus.history_of(topics::STATE_CHANGE);
        assert_eq!(changes.len(), 1);
        let payload = changes[0].payload();
        assert_eq!(payload["previous_state"], "IDLE");
        assert_eq!(payload["new_state"], "RUNNING");
        assert_eq!(payload["reason"], "start");
        assert_eq!(changes[0].source(), "worker");
    }

    #[tokio::test]
    async fn test_command_table() {
        let (_, _, lifecycle) = machine("worker");

        assert!(matches!(
            lifecycle.pause("early"),
            Err(LifecycleError::InvalidTransition { command: "pause", from: Idle })
        ));

        lifecycle.start().unwrap();
        lifecycle.wait("materials").unwrap();
        assert_eq!(lifecycle.state(), Waiting);
        lifecycle.pause("operator").unwrap();
        lifecycle.resume("operator").unwrap();
        lifecycle.wait("materials").unwrap();
        lifecycle.ready("delivered").unwrap();
        assert_eq!(lifecycle.state(), Running);

        assert!(!lifecycle.start().unwrap());
        lifecycle.stop("done").unwrap();
        assert!(matches!(
            lifecycle.resume("late"),
            Err(LifecycleError::InvalidTransition { from: Stopped, .. })
        ));
        assert!(lifecycle.restart("nope").is_err());
    }

    #[tokio::test]
    async fn test_fault_releases_locks_and_cancels() {
        let (bus, locks, lifecycle) = machine("worker");
        lifecycle.start().unwrap();

        let token = lifecycle.cancel_token();
        let guard = locks.try_acquire(Sector::new(0, 0)).unwrap();
        assert_eq!(locks.owned().len(), 1);

        lifecycle.fault("boom").unwrap();
        assert!(locks.owned().is_empty());
        assert!(token.is_cancelled());
        assert_eq!(bus.history_of(topics::LOCK_RELEASE).len(), 1);

        // Guard dropped after the force release must not broadcast again
        drop(guard);
        assert_eq!(bus.history_of(topics::LOCK_RELEASE).len(), 1);

        lifecycle.restart("operator").unwrap();
        assert_eq!(lifecycle.state(), Running);
        assert!(!lifecycle.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_watchers_notified() {
        let (_, _, lifecycle) = machine("worker");
        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move {
                lifecycle
                    .wait_until(|s| *s == Paused, Duration::from_secs(2))
                    .await
            })
        };

        lifecycle.start().unwrap();
        lifecycle.pause("operator").unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transitions() {
        let (bus, _, lifecycle) = machine("stress");
        let effective = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let threads: Vec<_> = (0..5)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                let effective = effective.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let target = if i % 2 == 0 { Running } else { Idle };
                        if lifecycle.transition(target, "stress").unwrap() {
                            effective.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert!(matches!(lifecycle.state(), Running | Idle));

        // Every effective transition published exactly one notice, in lock order
        let changes = bus.history_of(topics::STATE_CHANGE);
        assert_eq!(changes.len(), effective.load(std::sync::atomic::Ordering::SeqCst));
        let mut expected_previous = "IDLE".to_string();
        for change in &changes {
            assert_eq!(change.payload()["previous_state"], expected_previous.as_str());
            expected_previous = change.payload()["new_state"].as_str().unwrap().to_string();
        }
        assert_eq!(expected_previous, lifecycle.state().as_str());
    }

    #[test]
    fn test_state_parsing_and_display() {
        assert_eq!("waiting".parse::<ActorLifecycleState>().unwrap(), Waiting);
        assert!("sleeping".parse::<ActorLifecycleState>().is_err());
        assert_eq!(Error.to_string(), "ERROR");
        assert_eq!(serde_json::to_value(Paused).unwrap(), "PAUSED");
    }
}
