// actor/runtime.rs - Control loop host

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Actor, ActorContext, ActorController, ActorError};
use crate::bus::MessageBus;
use crate::lifecycle::{ActorLifecycleState, LifecycleError, LifecycleStateMachine};
use crate::locks::{LockPolicy, SectorLockRegistry};
use crate::persistence::PersistenceManager;

/// Control loop timing
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Re-check interval while PAUSED or IDLE
    pub poll_interval: Duration,

    /// Pause between cycles while RUNNING or WAITING
    pub cycle_interval: Duration,

    pub locks: LockPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            cycle_interval: Duration::from_millis(50),
            locks: LockPolicy::default(),
        }
    }
}

/// Hosts one actor and drives its control loop
pub struct ActorRuntime<A: Actor> {
    actor: A,
    ctx: ActorContext,
    controller: Arc<ActorController>,
    config: RuntimeConfig,
}

impl<A: Actor> ActorRuntime<A> {
    pub fn new(
        actor: A,
        bus: Arc<MessageBus>,
        persistence: PersistenceManager,
        config: RuntimeConfig,
    ) -> Self {
        let name = actor.name().to_string();
        let locks = SectorLockRegistry::new(name.as_str(), bus.clone(), config.locks.clone());
        let lifecycle = Arc::new(LifecycleStateMachine::new(
            name.as_str(),
            actor.default_start_state(),
            bus.clone(),
            locks.clone(),
        ));
        let ctx = ActorContext::new(&name, bus, lifecycle.clone(), locks);
        let controller = Arc::new(ActorController::new(
            name,
            lifecycle,
            actor.hooks(),
            persistence,
        ));

        Self {
            actor,
            ctx,
            controller,
            config,
        }
    }

    pub fn actor(&self) -> &A {
        &self.actor
    }

    pub fn context(&self) -> &ActorContext {
        &self.ctx
    }

    pub fn controller(&self) -> &Arc<ActorController> {
        &self.controller
    }

    /// Run the control loop until STOPPED or ERROR
    ///
    /// A fresh runtime restores its checkpoint first. A runtime left in ERROR
    /// by a previous run restarts into the default start state.
    pub async fn run(&mut self) -> Result<ActorLifecycleState, ActorError> {
        let name = self.ctx.name().to_string();
        let lifecycle = self.ctx.lifecycle().clone();

        match lifecycle.state() {
            ActorLifecycleState::Idle => self.restore().await?,
            ActorLifecycleState::Error => {
                lifecycle.restart("restart requested")?;
            }
            ActorLifecycleState::Stopped => {
                return Err(LifecycleError::InvalidTransition {
                    command: "run",
                    from: ActorLifecycleState::Stopped,
                }
                .into());
            }
            state => debug!(actor = %name, %state, "Runtime already started"),
        }

        for id in self.ctx.locks().install() {
            self.ctx.track(id);
        }
        self.controller.install(&self.ctx);

        info!(actor = %name, state = %lifecycle.state(), "Control loop started");

        let started = AssertUnwindSafe(self.actor.on_start(&self.ctx))
            .catch_unwind()
            .await;
        let exit = match flatten(started) {
            Ok(()) => self.drive().await,
            Err(e) => self.fault(e).await,
        };

        self.ctx.unsubscribe_all();
        info!(actor = %name, state = %exit, "Control loop exited");
        Ok(exit)
    }

    /// Load the checkpoint and enter the state it asks for
    async fn restore(&mut self) -> Result<(), ActorError> {
        let lifecycle = self.ctx.lifecycle().clone();
        let default = lifecycle.default_start();

        let target = match self.controller.load_checkpoint().await {
            Ok(Some(checkpoint)) => checkpoint.resume_state(default),
            Ok(None) => default,
            Err(e) => {
                warn!(actor = %self.ctx.name(), error = %e, "Ignoring unusable checkpoint");
                default
            }
        };

        match target {
            ActorLifecycleState::Running => {
                lifecycle.start()?;
            }
            ActorLifecycleState::Idle => {}
            other => {
                lifecycle.transition(other, "restored from checkpoint")?;
            }
        }
        Ok(())
    }

    async fn drive(&mut self) -> ActorLifecycleState {
        loop {
            let state = self.ctx.state();
            match state {
                ActorLifecycleState::Stopped | ActorLifecycleState::Error => return state,
                ActorLifecycleState::Paused | ActorLifecycleState::Idle => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                ActorLifecycleState::Running | ActorLifecycleState::Waiting => {
                    let cycle = AssertUnwindSafe(self.cycle()).catch_unwind().await;
                    match flatten(cycle) {
                        Ok(()) => {}
                        Err(e) if e.is_cancelled() => {
                            debug!(actor = %self.ctx.name(), "Cycle cancelled");
                        }
                        Err(e) => return self.fault(e).await,
                    }
                    tokio::time::sleep(self.config.cycle_interval).await;
                }
            }
        }
    }

    async fn cycle(&mut self) -> Result<(), ActorError> {
        self.actor.perceive(&self.ctx).await?;
        let decision = self.actor.decide(&self.ctx).await?;
        self.actor.act(decision, &self.ctx).await
    }

    /// Move to ERROR (releasing locks) and run the actor's error hook
    async fn fault(&mut self, error: ActorError) -> ActorLifecycleState {
        error!(actor = %self.ctx.name(), error = %error, "Actor fault");

        match self.ctx.lifecycle().fault(&error.to_string()) {
            Ok(_) => {}
            // Already STOPPED: the stop wins
            Err(e) => debug!(actor = %self.ctx.name(), error = %e, "Fault transition skipped"),
        }

        self.actor.on_error(&error, &self.ctx).await;
        self.ctx.state()
    }

    /// Run the loop on its own task
    pub fn spawn(self) -> ActorHandle<A> {
        let name = self.ctx.name().to_string();
        let lifecycle = self.ctx.lifecycle().clone();
        let controller = self.controller.clone();

        let task = tokio::spawn(async move {
            let mut runtime = self;
            let result = runtime.run().await;
            ActorExit { runtime, result }
        });

        ActorHandle {
            name,
            lifecycle,
            controller,
            task,
        }
    }
}

/// Runtime handed back when the loop exits
pub struct ActorExit<A: Actor> {
    pub runtime: ActorRuntime<A>,
    pub result: Result<ActorLifecycleState, ActorError>,
}

/// Control surface of a spawned actor
pub struct ActorHandle<A: Actor> {
    name: String,
    lifecycle: Arc<LifecycleStateMachine>,
    controller: Arc<ActorController>,
    task: JoinHandle<ActorExit<A>>,
}

impl<A: Actor> ActorHandle<A> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ActorLifecycleState {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleStateMachine> {
        &self.lifecycle
    }

    /// Start an actor left IDLE
    pub fn start(&self) -> Result<bool, ActorError> {
        Ok(self.lifecycle.start()?)
    }

    pub async fn pause(&self, reason: &str) -> Result<bool, ActorError> {
        self.controller.pause(reason).await
    }

    pub async fn resume(&self, reason: &str) -> Result<bool, ActorError> {
        self.controller.resume(reason).await
    }

    pub async fn stop(&self, reason: &str) -> Result<bool, ActorError> {
        self.controller.stop(reason).await
    }

    /// Wait for a state; false on timeout
    pub async fn wait_for(&self, state: ActorLifecycleState, timeout: Duration) -> bool {
        self.lifecycle.wait_until(|s| *s == state, timeout).await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit
    pub async fn join(self) -> Result<ActorExit<A>, ActorError> {
        self.task.await.map_err(|e| ActorError::Join(e.to_string()))
    }
}

fn flatten(outcome: Result<Result<(), ActorError>, Box<dyn Any + Send>>) -> Result<(), ActorError> {
    match outcome {
        Ok(result) => result,
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            Err(ActorError::Panic(message))
        }
    }
}
