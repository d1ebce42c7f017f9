// strategy/exploration.rs - Terrain scanning capability

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{BuildSite, StrategyRegistry};
use crate::actor::{ActorContext, ActorError};
use crate::message::{topics, Payload, BROADCAST};

/// Default half-width of a scan in columns
pub const DEFAULT_SCAN_RANGE: u32 = 20;

/// Column heights of the world being explored
pub trait Terrain: Send + Sync {
    fn height(&self, x: i64, z: i64) -> i64;
}

/// Level ground at one height
#[derive(Debug, Clone, Copy)]
pub struct FlatTerrain(pub i64);

impl Terrain for FlatTerrain {
    fn height(&self, _x: i64, _z: i64) -> i64 {
        self.0
    }
}

/// Terraces one block apart, climbing every `width` columns along x and
/// wrapping after four steps
#[derive(Debug, Clone, Copy)]
pub struct TerracedTerrain {
    base: i64,
    width: i64,
}

impl TerracedTerrain {
    pub fn new(base: i64, width: i64) -> Self {
        Self {
            base,
            width: width.max(1),
        }
    }
}

impl Default for TerracedTerrain {
    fn default() -> Self {
        Self::new(64, 8)
    }
}

impl Terrain for TerracedTerrain {
    fn height(&self, x: i64, _z: i64) -> i64 {
        self.base + x.div_euclid(self.width).rem_euclid(4)
    }
}

/// Square of columns `[center - range, center + range)` on both axes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanArea {
    pub x: i64,
    pub z: i64,
    pub range: u32,
}

impl ScanArea {
    pub fn new(x: i64, z: i64, range: u32) -> Self {
        Self { x, z, range }
    }

    /// Columns in scan order, x-major
    pub fn columns(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        let r = i64::from(self.range);
        (-r..r).flat_map(move |dx| (-r..r).map(move |dz| (self.x + dx, self.z + dz)))
    }
}

/// Flat spots found around a center column
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub center: BuildSite,
    pub flat_spots: Vec<BuildSite>,
}

impl ScanReport {
    /// `map.v1` payload: `{center: {x, y, z}, flat_spots, status}`
    pub fn to_payload(&self, status: &str) -> Payload {
        map_payload(self.center, &self.flat_spots, status)
    }
}

fn map_payload(center: BuildSite, spots: &[BuildSite], status: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert(
        "center".into(),
        json!({ "x": center.x, "y": center.y, "z": center.z }),
    );
    payload.insert("flat_spots".into(), json!(spots));
    payload.insert("status".into(), Value::from(status));
    payload
}

/// Finds build sites around a point
#[async_trait]
pub trait ExplorationStrategy: Send + Sync {
    fn key(&self) -> &str;

    /// Scan `area`; `Ok(None)` when `interrupt` fired first
    ///
    /// Long scans must call [`ActorContext::checkpoint_yield`] between batches.
    async fn scan(
        &self,
        area: ScanArea,
        ctx: &ActorContext,
        interrupt: &CancellationToken,
    ) -> Result<Option<ScanReport>, ActorError>;
}

/// Batched sweep of the scan square around its center
///
/// A column is flat when its height is within one block of the center's.
/// Some batches that find spots also publish them as a partial `map.v1`.
pub struct RadialScan {
    terrain: Arc<dyn Terrain>,
    batch_size: usize,
    batch_delay: Duration,
}

impl RadialScan {
    pub const KEY: &'static str = "radial_scan";

    /// Every n-th batch may publish a partial map
    pub const PARTIAL_EVERY: usize = 5;

    pub fn new(terrain: Arc<dyn Terrain>) -> Self {
        Self {
            terrain,
            batch_size: 20,
            batch_delay: Duration::ZERO,
        }
    }

    pub fn with_batches(mut self, batch_size: usize, batch_delay: Duration) -> Self {
        self.batch_size = batch_size.max(1);
        self.batch_delay = batch_delay;
        self
    }
}

#[async_trait]
impl ExplorationStrategy for RadialScan {
    fn key(&self) -> &str {
        Self::KEY
    }

    async fn scan(
        &self,
        area: ScanArea,
        ctx: &ActorContext,
        interrupt: &CancellationToken,
    ) -> Result<Option<ScanReport>, ActorError> {
        let center = BuildSite::new(area.x, area.z, self.terrain.height(area.x, area.z));
        let columns: Vec<(i64, i64)> = area.columns().collect();
        info!(actor = ctx.name(), %center, range = area.range, columns = columns.len(), "Radial scan started");

        let mut flat_spots = Vec::new();
        for (index, batch) in columns.chunks(self.batch_size).enumerate() {
            if interrupt.is_cancelled() {
                info!(actor = ctx.name(), batch = index, "Radial scan interrupted");
                return Ok(None);
            }
            ctx.checkpoint_yield().await?;

            let found: Vec<BuildSite> = batch
                .iter()
                .map(|&(x, z)| BuildSite::new(x, z, self.terrain.height(x, z)))
                .filter(|site| (site.y - center.y).abs() <= 1)
                .collect();

            if !found.is_empty() && index % Self::PARTIAL_EVERY == 0 {
                debug!(actor = ctx.name(), batch = index, spots = found.len(), "Publishing partial map");
                ctx.publish(
                    ctx.message(topics::MAP, BROADCAST)
                        .with_payload(map_payload(center, &found, "partial")),
                )?;
            }
            flat_spots.extend(found);

            if !self.batch_delay.is_zero() {
                ctx.sleep(self.batch_delay).await?;
            }
        }

        info!(actor = ctx.name(), %center, spots = flat_spots.len(), "Radial scan complete");
        Ok(Some(ScanReport { center, flat_spots }))
    }
}

/// `radial_scan` over the default terraces
pub fn standard_exploration() -> StrategyRegistry<dyn ExplorationStrategy> {
    let mut registry: StrategyRegistry<dyn ExplorationStrategy> = StrategyRegistry::new();
    registry.register(RadialScan::KEY, || {
        Arc::new(RadialScan::new(Arc::new(TerracedTerrain::default())))
    });
    registry
}
