// strategy/mod.rs - Pluggable Capabilities

//! Keyed registries of interchangeable capabilities.
//!
//! Actors never persist strategy objects. They store the registry key and
//! resolve it again after a restart, so every strategy that can appear in a
//! checkpoint must be registered under a stable key.
//!
//! ```ignore
//! let blueprints = standard_blueprints();
//! let hut = blueprints.resolve("simplehut")?;
//! assert_eq!(hut.bom().get("WOOD_PLANKS"), 58);
//! ```

pub mod building;
pub mod exploration;
pub mod mining;

pub use building::{standard_blueprints, Blueprint, BuildReport, BuildSite, BuildingStrategy};
pub use exploration::{
    standard_exploration, ExplorationStrategy, FlatTerrain, RadialScan, ScanArea, ScanReport,
    TerracedTerrain, Terrain, DEFAULT_SCAN_RANGE,
};
pub use mining::{standard_mining, BarrenMining, MiningStrategy, SimulatedMining};

use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    #[error("Unknown strategy '{0}'")]
    Unknown(String),
}

type Factory<T> = Arc<dyn Fn() -> Arc<T> + Send + Sync>;

/// Stable key -> strategy factory
pub struct StrategyRegistry<T: ?Sized> {
    factories: BTreeMap<String, Factory<T>>,
}

impl<T: ?Sized> StrategyRegistry<T> {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register a factory, replacing any previous one under `key`
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
        self
    }

    pub fn resolve(&self, key: &str) -> Result<Arc<T>, StrategyError> {
        self.factories
            .get(key)
            .map(|factory| factory())
            .ok_or_else(|| StrategyError::Unknown(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl<T: ?Sized> Default for StrategyRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for StrategyRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            factories: self.factories.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Hello;

    impl Greeter for Hello {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry: StrategyRegistry<dyn Greeter> = StrategyRegistry::new();
        registry.register("hello", || Arc::new(Hello));

        assert!(registry.contains("hello"));
        assert_eq!(registry.resolve("hello").unwrap().greet(), "hello");
        assert_eq!(
            registry.resolve("bye").err(),
            Some(StrategyError::Unknown("bye".into()))
        );
        assert_eq!(registry.keys().collect::<Vec<_>>(), vec!["hello"]);
    }
}
