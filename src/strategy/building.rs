// strategy/building.rs - Construction capability and blueprints

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::StrategyRegistry;
use crate::actor::{ActorContext, ActorError};
use crate::resources::Bom;

/// Flat spot reported by exploration, `[x, z, y]` on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(i64, i64, i64)", into = "(i64, i64, i64)")]
pub struct BuildSite {
    pub x: i64,
    pub z: i64,
    pub y: i64,
}

impl BuildSite {
    pub const fn new(x: i64, z: i64, y: i64) -> Self {
        Self { x, z, y }
    }
}

impl From<(i64, i64, i64)> for BuildSite {
    fn from((x, z, y): (i64, i64, i64)) -> Self {
        Self { x, z, y }
    }
}

impl From<BuildSite> for (i64, i64, i64) {
    fn from(site: BuildSite) -> Self {
        (site.x, site.z, site.y)
    }
}

impl fmt::Display for BuildSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.x, self.z, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub template: String,
    pub site: BuildSite,
    pub layers: u32,
}

/// Turns delivered materials into a structure
#[async_trait]
pub trait BuildingStrategy: Send + Sync {
    fn key(&self) -> &str;

    /// Materials the structure consumes
    fn bom(&self) -> Bom;

    async fn execute(&self, site: BuildSite, ctx: &ActorContext) -> Result<BuildReport, ActorError>;
}

/// Structure built layer by layer with a yield point per layer
#[derive(Debug, Clone)]
pub struct Blueprint {
    key: String,
    bom: Bom,
    layers: u32,
    layer_delay: Duration,
}

impl Blueprint {
    pub fn new(key: impl Into<String>, bom: Bom, layers: u32) -> Self {
        Self {
            key: key.into(),
            bom,
            layers,
            layer_delay: Duration::from_millis(10),
        }
    }

    pub fn with_layer_delay(mut self, layer_delay: Duration) -> Self {
        self.layer_delay = layer_delay;
        self
    }

    pub fn simple_hut() -> Self {
        Self::new(
            "simplehut",
            [("COBBLESTONE", 25), ("WOOD_PLANKS", 58)].into_iter().collect(),
            4,
        )
    }

    pub fn stone_tower() -> Self {
        Self::new(
            "stonetower",
            [("STONE", 80), ("TORCH", 4)].into_iter().collect(),
            8,
        )
    }
}

#[async_trait]
impl BuildingStrategy for Blueprint {
    fn key(&self) -> &str {
        &self.key
    }

    fn bom(&self) -> Bom {
        self.bom.clone()
    }

    async fn execute(&self, site: BuildSite, ctx: &ActorContext) -> Result<BuildReport, ActorError> {
        info!(actor = ctx.name(), template = %self.key, %site, "Construction started");

        for layer in 0..self.layers {
            ctx.checkpoint_yield().await?;
            ctx.sleep(self.layer_delay).await?;
            debug!(actor = ctx.name(), template = %self.key, layer, "Layer placed");
        }

        Ok(BuildReport {
            template: self.key.clone(),
            site,
            layers: self.layers,
        })
    }
}

/// `simplehut` and `stonetower`
pub fn standard_blueprints() -> StrategyRegistry<dyn BuildingStrategy> {
    let mut registry: StrategyRegistry<dyn BuildingStrategy> = StrategyRegistry::new();
    registry
        .register("simplehut", || Arc::new(Blueprint::simple_hut()))
        .register("stonetower", || Arc::new(Blueprint::stone_tower()));
    registry
}
