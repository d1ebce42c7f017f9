// config.rs - Swarm configuration
//
//! Layered configuration for a swarm node
//!
//! Defaults come from [`SwarmConfig::default`], are overridden by an optional
//! file (TOML, JSON or YAML by extension) and then by `SWARM__*` environment
//! variables, e.g. `SWARM__BUS__MAX_ATTEMPTS=5` or
//! `SWARM__RESOURCES__MAX_FULFILLMENT_ATTEMPTS=20`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::actor::RuntimeConfig;
use crate::bus::{BusConfig, DEFAULT_MAX_ATTEMPTS};
use crate::locks::LockPolicy;
use crate::observability::TracingConfig;
use crate::persistence::PersistenceConfig;
use crate::resources::{
    ConversionTable, FulfillmentPolicy, ResourceCoordinator, DEFAULT_MAX_FULFILLMENT_ATTEMPTS,
};
use crate::strategy::DEFAULT_SCAN_RANGE;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SWARM";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Message bus tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub max_concurrent_dispatch: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub soft_timeout_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            max_concurrent_dispatch: 16,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: 100,
            soft_timeout_ms: 5_000,
        }
    }
}

impl BusSettings {
    pub fn to_bus_config(&self) -> BusConfig {
        BusConfig {
            max_concurrent_dispatch: self.max_concurrent_dispatch,
            max_attempts: self.max_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            soft_timeout: Duration::from_millis(self.soft_timeout_ms),
        }
    }
}

/// Control loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    pub poll_interval_ms: u64,
    pub cycle_interval_ms: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            cycle_interval_ms: 50,
        }
    }
}

/// Fulfillment bound and the material rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSettings {
    pub max_fulfillment_attempts: u32,
    pub attempt_delay_ms: u64,
    /// Replaces the standard table entirely when given
    pub table: ConversionTable,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            max_fulfillment_attempts: DEFAULT_MAX_FULFILLMENT_ATTEMPTS,
            attempt_delay_ms: 100,
            table: ConversionTable::standard(),
        }
    }
}

impl ResourceSettings {
    pub fn fulfillment_policy(&self) -> FulfillmentPolicy {
        FulfillmentPolicy {
            max_attempts: self.max_fulfillment_attempts,
            attempt_delay: Duration::from_millis(self.attempt_delay_ms),
        }
    }

    pub fn coordinator(&self) -> ResourceCoordinator {
        ResourceCoordinator::new(Arc::new(self.table.clone()), self.fulfillment_policy())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerSettings {
    pub name: String,
    /// Block position whose sector the producer mines in
    pub home: (i64, i64),
    pub mining: String,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            name: "miner".into(),
            home: (0, 0),
            mining: "simulated".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    pub name: String,
    pub template: String,
    /// Requirements target; `all` broadcasts them
    pub supplier: String,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            name: "builder".into(),
            template: "simplehut".into(),
            supplier: "miner".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerSettings {
    pub name: String,
    /// Column scanned when a start request names no target
    pub home: (i64, i64),
    pub exploration: String,
    pub scan_range: u32,
}

impl Default for ExplorerSettings {
    fn default() -> Self {
        Self {
            name: "explorer".into(),
            home: (0, 0),
            exploration: "radial_scan".into(),
            scan_range: DEFAULT_SCAN_RANGE,
        }
    }
}

/// Reference actors run by `swarm-node`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub explorer: ExplorerSettings,
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
}

/// Complete node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub bus: BusSettings,
    pub lifecycle: LifecycleSettings,
    pub resources: ResourceSettings,
    pub locks: LockPolicy,
    pub persistence: PersistenceConfig,
    pub tracing: TracingConfig,
    pub agents: AgentSettings,
}

impl SwarmConfig {
    /// Load defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text without consulting the environment
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Validation(message.to_string()));

        if self.bus.max_concurrent_dispatch == 0 {
            return invalid("bus.max_concurrent_dispatch must be at least 1");
        }
        if self.bus.max_attempts == 0 {
            return invalid("bus.max_attempts must be at least 1");
        }
        if self.lifecycle.poll_interval_ms == 0 {
            return invalid("lifecycle.poll_interval_ms must be greater than 0");
        }
        if self.resources.max_fulfillment_attempts == 0 {
            return invalid("resources.max_fulfillment_attempts must be at least 1");
        }
        if self.locks.tile_size < 1 {
            return invalid("locks.tile_size must be at least 1");
        }
        self.resources
            .table
            .validate()
            .map_err(|e| ConfigError::Validation(format!("resources.table: {e}")))?;

        if self.agents.explorer.scan_range == 0 {
            return invalid("agents.explorer.scan_range must be at least 1");
        }

        let explorer = self.agents.explorer.name.trim();
        let producer = self.agents.producer.name.trim();
        let consumer = self.agents.consumer.name.trim();
        if explorer.is_empty() || producer.is_empty() || consumer.is_empty() {
            return invalid("agent names must not be empty");
        }
        if producer == consumer || explorer == producer || explorer == consumer {
            return invalid("agents need distinct names");
        }
        Ok(())
    }

    pub fn bus_config(&self) -> BusConfig {
        self.bus.to_bus_config()
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            poll_interval: Duration::from_millis(self.lifecycle.poll_interval_ms),
            cycle_interval: Duration::from_millis(self.lifecycle.cycle_interval_ms),
            locks: self.locks.clone(),
        }
    }

    pub fn fulfillment_policy(&self) -> FulfillmentPolicy {
        self.resources.fulfillment_policy()
    }

    pub fn persistence_config(&self) -> PersistenceConfig {
        self.persistence.clone()
    }
}
