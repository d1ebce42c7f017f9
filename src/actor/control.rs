// actor/control.rs - Pause/resume/stop with checkpointing

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{ActorContext, ActorError, ActorHooks};
use crate::lifecycle::{Checkpoint, LifecycleError, LifecycleStateMachine};
use crate::message::{topics, Message, Payload};
use crate::persistence::PersistenceManager;

/// External control surface of one actor
///
/// Pause and stop write a checkpoint when they change state. The same
/// operations are reachable over the bus through the `control.agent.*` topics.
pub struct ActorController {
    name: String,
    lifecycle: Arc<LifecycleStateMachine>,
    hooks: Arc<dyn ActorHooks>,
    persistence: PersistenceManager,
}

impl ActorController {
    pub fn new(
        name: impl Into<String>,
        lifecycle: Arc<LifecycleStateMachine>,
        hooks: Arc<dyn ActorHooks>,
        persistence: PersistenceManager,
    ) -> Self {
        Self {
            name: name.into(),
            lifecycle,
            hooks,
            persistence,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleStateMachine> {
        &self.lifecycle
    }

    pub async fn pause(&self, reason: &str) -> Result<bool, ActorError> {
        let changed = self.lifecycle.pause(reason)?;
        if changed {
            self.save_checkpoint().await?;
        }
        Ok(changed)
    }

    pub async fn resume(&self, reason: &str) -> Result<bool, ActorError> {
        Ok(self.lifecycle.resume(reason)?)
    }

    pub async fn stop(&self, reason: &str) -> Result<bool, ActorError> {
        let changed = self.lifecycle.stop(reason)?;
        if changed {
            self.save_checkpoint().await?;
        }
        Ok(changed)
    }

    /// Persist the current state and the actor's custom data
    pub async fn save_checkpoint(&self) -> Result<Checkpoint, ActorError> {
        let checkpoint = Checkpoint::new(self.name.as_str(), self.lifecycle.state())
            .with_custom_data(self.hooks.encode_checkpoint());
        self.persistence.save(&checkpoint).await?;
        debug!(actor = %self.name, state = %checkpoint.state, "Checkpoint written");
        Ok(checkpoint)
    }

    /// Load the stored checkpoint and hand its data to the actor
    pub async fn load_checkpoint(&self) -> Result<Option<Checkpoint>, ActorError> {
        let Some(checkpoint) = self.persistence.load(&self.name).await? else {
            return Ok(None);
        };
        self.hooks.decode_checkpoint(&checkpoint.custom_data)?;
        info!(
            actor = %self.name,
            state = %checkpoint.state,
            saved_at = %checkpoint.timestamp,
            "Checkpoint loaded"
        );
        Ok(Some(checkpoint))
    }

    /// `{state, name}` merged with the actor's status fields
    pub fn status_report(&self) -> Payload {
        let mut report = self.hooks.status_fields();
        report.insert("state".into(), Value::from(self.lifecycle.state().as_str()));
        report.insert("name".into(), Value::from(self.name.as_str()));
        report
    }

    /// Subscribe to the control topics for this run
    pub fn install(self: &Arc<Self>, ctx: &ActorContext) {
        for topic in [
            topics::CONTROL_PAUSE,
            topics::CONTROL_RESUME,
            topics::CONTROL_STOP,
            topics::STATUS_REQUEST,
        ] {
            let controller = Arc::clone(self);
            let ctx_for_reply = ctx.clone();
            ctx.subscribe(topic, move |msg| {
                let controller = controller.clone();
                let ctx = ctx_for_reply.clone();
                async move { controller.handle_control(&msg, &ctx).await }
            });
        }
    }

    async fn handle_control(&self, msg: &Message, ctx: &ActorContext) -> anyhow::Result<()> {
        if !msg.is_addressed_to(&self.name) {
            return Ok(());
        }

        let reason = format!("{} from {}", msg.kind(), msg.source());
        let result = match msg.kind() {
            topics::CONTROL_PAUSE => self.pause(&reason).await.map(|_| ()),
            topics::CONTROL_RESUME => self.resume(&reason).await.map(|_| ()),
            topics::CONTROL_STOP => self.stop(&reason).await.map(|_| ()),
            topics::STATUS_REQUEST => {
                let report = Message::new(topics::STATUS_REPORT, self.name.as_str(), msg.source())
                    .with_payload(self.status_report());
                ctx.publish(report).map(|_| ())
            }
            _ => Ok(()),
        };

        match result {
            // A command that does not apply in the current state is not worth a retry
            Err(ActorError::Lifecycle(e @ LifecycleError::InvalidTransition { .. })) => {
                warn!(actor = %self.name, topic = msg.kind(), source = msg.source(), error = %e, "Control command ignored");
                Ok(())
            }
            other => other.map_err(anyhow::Error::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusConfig, MessageBus};
    use crate::lifecycle::ActorLifecycleState;
    use crate::locks::{LockPolicy, SectorLockRegistry};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    struct Counter(Mutex<u64>);

    impl ActorHooks for Counter {
        fn encode_checkpoint(&self) -> Payload {
            let mut data = Payload::new();
            data.insert("count".into(), json!(*self.0.lock()));
            data
        }

        fn decode_checkpoint(&self, data: &Payload) -> Result<(), ActorError> {
            let count = data
                .get("count")
                .and_then(Value::as_u64)
                .ok_or_else(|| ActorError::Checkpoint("missing count".into()))?;
            *self.0.lock() = count;
            Ok(())
        }

        fn status_fields(&self) -> Payload {
            let mut fields = Payload::new();
            fields.insert("count".into(), json!(*self.0.lock()));
            fields
        }
    }

    fn setup(name: &str) -> (ActorContext, Arc<ActorController>, Arc<Counter>, PersistenceManager) {
        let bus = Arc::new(MessageBus::new(BusConfig::default()).unwrap());
        let locks = SectorLockRegistry::new(name, bus.clone(), LockPolicy::default());
        let lifecycle = Arc::new(LifecycleStateMachine::new(
            name,
            ActorLifecycleState::Running,
            bus.clone(),
            locks.clone(),
        ));
        let ctx = ActorContext::new(name, bus, lifecycle.clone(), locks);
        let hooks = Arc::new(Counter(Mutex::new(7)));
        let persistence = PersistenceManager::in_memory();
        let controller = Arc::new(ActorController::new(
            name,
            lifecycle,
            hooks.clone(),
            persistence.clone(),
        ));
        (ctx, controller, hooks, persistence)
    }

    #[tokio::test]
    async fn test_pause_and_stop_checkpoint() {
        let (ctx, controller, hooks, persistence) = setup("miner");
        ctx.lifecycle().start().unwrap();

        assert!(controller.pause("operator").await.unwrap());
        let saved = persistence.load("miner").await.unwrap().unwrap();
        assert_eq!(saved.state, ActorLifecycleState::Paused);
        assert_eq!(saved.custom_data["count"], 7);

        // No state change, no new checkpoint
        *hooks.0.lock() = 9;
        assert!(!controller.pause("operator").await.unwrap());
        assert_eq!(persistence.load("miner").await.unwrap().unwrap().custom_data["count"], 7);

        controller.stop("shutdown").await.unwrap();
        let saved = persistence.load("miner").await.unwrap().unwrap();
        assert_eq!(saved.state, ActorLifecycleState::Stopped);
        assert_eq!(saved.custom_data["count"], 9);
    }

    #[tokio::test]
    async fn test_load_checkpoint_decodes() {
        let (_ctx, controller, hooks, persistence) = setup("miner");
        let mut data = Payload::new();
        data.insert("count".into(), json!(42));
        persistence
            .save(&Checkpoint::new("miner", ActorLifecycleState::Paused).with_custom_data(data))
            .await
            .unwrap();

        let loaded = controller.load_checkpoint().await.unwrap().unwrap();
        assert_eq!(loaded.state, ActorLifecycleState::Paused);
        assert_eq!(*hooks.0.lock(), 42);
    }

    #[tokio::test]
    async fn test_control_messages() {
        let (ctx, controller, _hooks, _) = setup("miner");
        controller.install(&ctx);
        ctx.lifecycle().start().unwrap();

        // Addressed to someone else: ignored
        ctx.bus()
            .publish(Message::new(topics::CONTROL_PAUSE, "operator", "builder"))
            .unwrap();
        assert!(ctx.bus().wait_idle(Duration::from_secs(2)).await);
        assert_eq!(ctx.state(), ActorLifecycleState::Running);

        ctx.bus()
            .publish(Message::broadcast(topics::CONTROL_PAUSE, "operator"))
            .unwrap();
        assert!(ctx.bus().wait_idle(Duration::from_secs(2)).await);
        assert_eq!(ctx.state(), ActorLifecycleState::Paused);

        ctx.bus()
            .publish(Message::new(topics::STATUS_REQUEST, "operator", "miner"))
            .unwrap();
        assert!(ctx.bus().wait_idle(Duration::from_secs(2)).await);

        let reports = ctx.bus().history_of(topics::STATUS_REPORT);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].target(), "operator");
        assert_eq!(reports[0].payload()["state"], "PAUSED");
        assert_eq!(reports[0].payload()["name"], "miner");
        assert_eq!(reports[0].payload()["count"], 7);

        // The second resume is a no-op
        for _ in 0..2 {
            ctx.bus()
                .publish(Message::new(topics::CONTROL_RESUME, "operator", "miner"))
                .unwrap();
        }
        assert!(ctx.bus().wait_idle(Duration::from_secs(2)).await);
        assert_eq!(ctx.state(), ActorLifecycleState::Running);

        ctx.bus()
            .publish(Message::new(topics::CONTROL_STOP, "operator", "miner"))
            .unwrap();
        assert!(ctx.bus().wait_idle(Duration::from_secs(2)).await);
        assert_eq!(ctx.state(), ActorLifecycleState::Stopped);

        // Pause after stop is refused without a retry storm
        ctx.bus()
            .publish(Message::new(topics::CONTROL_PAUSE, "operator", "miner"))
            .unwrap();
        assert!(ctx.bus().wait_idle(Duration::from_secs(2)).await);
        assert_eq!(ctx.state(), ActorLifecycleState::Stopped);
    }
}
