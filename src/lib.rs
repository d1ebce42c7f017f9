// lib.rs - Swarm Coordination Substrate
//
// Lets autonomous actors share scarce, spatially located resources without a
// central scheduler. Provides an async message bus, per-actor lifecycles with
// durable checkpoints, resource negotiation and advisory sector locks.

#![doc = include_str!("../README.md")]

pub mod actor;
pub mod agents;
pub mod bus;
pub mod config;
pub mod lifecycle;
pub mod locks;
pub mod message;
pub mod observability;
pub mod persistence;
pub mod resources;
pub mod strategy;

// Re-export commonly used types
pub use actor::{
    Actor, ActorContext, ActorController, ActorError, ActorExit, ActorHandle, ActorHooks,
    ActorRuntime, RuntimeConfig,
};

pub use agents::{BuildConsumer, Explorer, ResourceProducer};

pub use bus::{BusConfig, BusError, MessageBus, SubscriptionId};

pub use config::{ConfigError, SwarmConfig};

pub use lifecycle::{ActorLifecycleState, Checkpoint, LifecycleError, LifecycleStateMachine};

pub use locks::{LockError, LockPolicy, Sector, SectorGuard, SectorLockRegistry};

pub use message::{topics, Message, MessageValidator, Payload, ValidationError, BROADCAST};

pub use resources::{
    Bom, ConversionTable, FulfillmentPolicy, Holdings, Materials, ResourceCoordinator, Shortfall,
};

pub use observability::{
    init_metrics, init_tracing, MetricsConfig, MetricsHandle, TracingConfig, TracingFormat,
};

pub use persistence::{PersistenceConfig, PersistenceManager};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::actor::{
        Actor, ActorContext, ActorError, ActorHandle, ActorHooks, ActorRuntime, RuntimeConfig,
    };
    pub use crate::bus::{BusConfig, MessageBus};
    pub use crate::lifecycle::{ActorLifecycleState, Checkpoint};
    pub use crate::locks::{LockError, Sector, SectorGuard};
    pub use crate::message::{topics, Message, Payload, BROADCAST};
    pub use crate::persistence::{PersistenceConfig, PersistenceManager};
    pub use crate::resources::{Bom, ConversionTable, Holdings, Materials, ResourceCoordinator};
    pub use crate::strategy::{
        BuildSite, BuildingStrategy, ExplorationStrategy, MiningStrategy, StrategyRegistry,
    };
}
