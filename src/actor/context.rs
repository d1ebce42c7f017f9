// actor/context.rs - Per-actor access to the swarm

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ActorError;
use crate::bus::{MessageBus, SubscriptionId};
use crate::lifecycle::{ActorLifecycleState, LifecycleStateMachine};
use crate::locks::SectorLockRegistry;
use crate::message::Message;

/// Handles an actor uses to talk to the swarm
///
/// Cheap to clone; bus callbacks capture clones. Subscriptions made through
/// the context are removed when the control loop exits.
#[derive(Clone)]
pub struct ActorContext {
    name: Arc<str>,
    bus: Arc<MessageBus>,
    lifecycle: Arc<LifecycleStateMachine>,
    locks: Arc<SectorLockRegistry>,
    subscriptions: Arc<Mutex<Vec<SubscriptionId>>>,
}

impl ActorContext {
    pub fn new(
        name: &str,
        bus: Arc<MessageBus>,
        lifecycle: Arc<LifecycleStateMachine>,
        locks: Arc<SectorLockRegistry>,
    ) -> Self {
        Self {
            name: Arc::from(name),
            bus,
            lifecycle,
            locks,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleStateMachine> {
        &self.lifecycle
    }

    pub fn locks(&self) -> &Arc<SectorLockRegistry> {
        &self.locks
    }

    pub fn state(&self) -> ActorLifecycleState {
        self.lifecycle.state()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.lifecycle.cancel_token()
    }

    /// Subscribe for the lifetime of the current run
    pub fn subscribe<F, Fut>(&self, kind: &str, callback: F) -> SubscriptionId
    where
        F: Fn(Arc<Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.bus.subscribe(kind, callback);
        self.track(id);
        id
    }

    pub(crate) fn track(&self, id: SubscriptionId) {
        self.subscriptions.lock().push(id);
    }

    pub(crate) fn unsubscribe_all(&self) -> usize {
        let ids: Vec<SubscriptionId> = std::mem::take(&mut *self.subscriptions.lock());
        let removed = ids.into_iter().filter(|id| self.bus.unsubscribe(*id)).count();
        debug!(actor = %self.name, removed, "Subscriptions removed");
        removed
    }

    /// Message from this actor to `target`
    pub fn message(&self, kind: &str, target: &str) -> Message {
        Message::new(kind, self.name.as_ref(), target)
    }

    pub fn publish(&self, message: Message) -> Result<usize, ActorError> {
        Ok(self.bus.publish(message)?)
    }

    /// Cooperative yield point for long operations
    ///
    /// Parks while PAUSED and fails with [`ActorError::Cancelled`] once the
    /// actor is STOPPED or in ERROR.
    pub async fn checkpoint_yield(&self) -> Result<(), ActorError> {
        loop {
            let state = self.lifecycle.state();
            if state.is_terminal() {
                return Err(ActorError::Cancelled);
            }
            if state != ActorLifecycleState::Paused {
                tokio::task::yield_now().await;
                return Ok(());
            }

            debug!(actor = %self.name, "Parked at yield point while paused");
            let mut rx = self.lifecycle.subscribe();
            while *rx.borrow_and_update() == ActorLifecycleState::Paused {
                if rx.changed().await.is_err() {
                    return Err(ActorError::Cancelled);
                }
            }
        }
    }

    /// Sleep that ends early with [`ActorError::Cancelled`] when stopped
    pub async fn sleep(&self, duration: Duration) -> Result<(), ActorError> {
        let token = self.cancel_token();
        tokio::select! {
            _ = token.cancelled() => Err(ActorError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConfig;
    use crate::locks::LockPolicy;

    fn context() -> ActorContext {
        let bus = Arc::new(MessageBus::new(BusConfig::default()).unwrap());
        let locks = SectorLockRegistry::new("worker", bus.clone(), LockPolicy::default());
        let lifecycle = Arc::new(LifecycleStateMachine::new(
            "worker",
            ActorLifecycleState::Running,
            bus.clone(),
            locks.clone(),
        ));
        ActorContext::new("worker", bus, lifecycle, locks)
    }

    #[tokio::test]
    async fn test_yield_parks_while_paused() {
        let ctx = context();
        ctx.lifecycle().start().unwrap();
        ctx.lifecycle().pause("operator").unwrap();

        let parked = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.checkpoint_yield().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!parked.is_finished());

        ctx.lifecycle().resume("operator").unwrap();
        assert!(parked.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_yield_cancelled_on_stop() {
        let ctx = context();
        ctx.lifecycle().start().unwrap();
        ctx.lifecycle().pause("operator").unwrap();

        let parked = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.checkpoint_yield().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.lifecycle().stop("shutdown").unwrap();

        assert!(parked.await.unwrap().unwrap_err().is_cancelled());
        assert!(ctx.sleep(Duration::from_secs(5)).await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_unsubscribe_all() {
        let ctx = context();
        ctx.subscribe("a", |_| async { Ok(()) });
        ctx.subscribe("b", |_| async { Ok(()) });
        assert_eq!(ctx.bus().subscriber_count("a"), 1);

        assert_eq!(ctx.unsubscribe_all(), 2);
        assert_eq!(ctx.bus().subscriber_count("a"), 0);
        assert_eq!(ctx.unsubscribe_all(), 0);
    }
}
