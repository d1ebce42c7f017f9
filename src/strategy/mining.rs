// strategy/mining.rs - Material gathering capability

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::StrategyRegistry;
use crate::actor::{ActorContext, ActorError};
use crate::locks::Sector;
use crate::resources::{Holdings, Shortfall};

/// Gathers materials inside one sector
#[async_trait]
pub trait MiningStrategy: Send + Sync {
    fn key(&self) -> &str;

    /// One gathering run aimed at `shortfall`; returns what was obtained
    ///
    /// Long runs must call [`ActorContext::checkpoint_yield`] between steps.
    async fn mine(
        &self,
        sector: Sector,
        shortfall: &Shortfall,
        ctx: &ActorContext,
    ) -> Result<Holdings, ActorError>;
}

/// Fixed yield per run, spread over a few cooperative steps
#[derive(Debug, Clone)]
pub struct SimulatedMining {
    yield_per_run: Holdings,
    steps: u32,
    step_delay: Duration,
}

impl SimulatedMining {
    pub const KEY: &'static str = "simulated";

    pub fn new(yield_per_run: Holdings) -> Self {
        Self {
            yield_per_run,
            steps: 4,
            step_delay: Duration::from_millis(5),
        }
    }

    pub fn with_steps(mut self, steps: u32, step_delay: Duration) -> Self {
        self.steps = steps;
        self.step_delay = step_delay;
        self
    }

    /// A mixed haul of wood, stone and coal
    pub fn standard() -> Self {
        Self::new(
            [("WOOD", 5), ("COBBLESTONE", 16), ("COAL_ORE", 1)]
                .into_iter()
                .collect(),
        )
    }
}

#[async_trait]
impl MiningStrategy for SimulatedMining {
    fn key(&self) -> &str {
        Self::KEY
    }

    async fn mine(
        &self,
        sector: Sector,
        shortfall: &Shortfall,
        ctx: &ActorContext,
    ) -> Result<Holdings, ActorError> {
        for step in 0..self.steps {
            ctx.checkpoint_yield().await?;
            ctx.sleep(self.step_delay).await?;
            debug!(actor = ctx.name(), %sector, step, target = %shortfall.material, "Mining");
        }
        Ok(self.yield_per_run.clone())
    }
}

/// Always comes back empty
#[derive(Debug, Clone, Default)]
pub struct BarrenMining;

impl BarrenMining {
    pub const KEY: &'static str = "barren";
}

#[async_trait]
impl MiningStrategy for BarrenMining {
    fn key(&self) -> &str {
        Self::KEY
    }

    async fn mine(
        &self,
        sector: Sector,
        _shortfall: &Shortfall,
        ctx: &ActorContext,
    ) -> Result<Holdings, ActorError> {
        ctx.checkpoint_yield().await?;
        debug!(actor = ctx.name(), %sector, "Sector is barren");
        Ok(Holdings::new())
    }
}

/// `simulated` and `barren`
pub fn standard_mining() -> StrategyRegistry<dyn MiningStrategy> {
    let mut registry: StrategyRegistry<dyn MiningStrategy> = StrategyRegistry::new();
    registry
        .register(SimulatedMining::KEY, || Arc::new(SimulatedMining::standard()))
        .register(BarrenMining::KEY, || Arc::new(BarrenMining));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusConfig, MessageBus};
    use crate::lifecycle::{ActorLifecycleState, LifecycleStateMachine};
    use crate::locks::{LockPolicy, SectorLockRegistry};

    fn context() -> ActorContext {
        let bus = Arc::new(MessageBus::new(BusConfig::default()).unwrap());
        let locks = SectorLockRegistry::new("miner", bus.clone(), LockPolicy::default());
        let lifecycle = Arc::new(LifecycleStateMachine::new(
            "miner",
            ActorLifecycleState::Running,
            bus.clone(),
            locks.clone(),
        ));
        ActorContext::new("miner", bus, lifecycle, locks)
    }

    fn shortfall() -> Shortfall {
        Shortfall {
            material: "WOOD".into(),
            required: 10,
            available: 0,
        }
    }

    #[tokio::test]
    async fn test_simulated_yield() {
        let ctx = context();
        ctx.lifecycle().start().unwrap();
        let mining = SimulatedMining::new([("WOOD", 5)].into_iter().collect())
            .with_steps(2, Duration::from_millis(1));

        let haul = mining.mine(Sector::new(0, 0), &shortfall(), &ctx).await.unwrap();
        assert_eq!(haul.get("WOOD"), 5);
    }

    #[tokio::test]
    async fn test_mining_cancelled_when_stopped() {
        let ctx = context();
        ctx.lifecycle().start().unwrap();
        ctx.lifecycle().stop("shutdown").unwrap();

        let result = SimulatedMining::standard()
            .mine(Sector::new(0, 0), &shortfall(), &ctx)
            .await;
        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_standard_registry() {
        let registry = standard_mining();
        assert_eq!(registry.resolve("simulated").unwrap().key(), "simulated");
        assert_eq!(registry.resolve("barren").unwrap().key(), "barren");
        assert!(registry.resolve("laser").is_err());
    }
}
